use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;

use crate::clock::Clock;
use crate::config::ReviewPolicy;
use crate::workflows::eligibility::domain::{Metadata, SubjectRef, UserId};
use crate::workflows::eligibility::records::{Event, NewEvent};
use crate::workflows::eligibility::repository::{
    EligibilityRepository, RecordWriter, RepositoryError,
};

pub const SERVICE_GENERATED_KEY: &str = "service_generated";

/// Append-only audit logger that suppresses repeats of the same action on the same record
/// inside a short window.
///
/// The lookup and the insert are separate statements, so two concurrent callers can both
/// pass the check and both insert. That is acceptable for an advisory trail; anything that
/// needs a hard guarantee has to enforce it with a storage-level constraint.
#[derive(Debug, Clone)]
pub struct AuditEventRecorder {
    clock: Arc<dyn Clock>,
    dedup_window: Duration,
}

impl AuditEventRecorder {
    pub fn new(clock: Arc<dyn Clock>, policy: &ReviewPolicy) -> Self {
        Self {
            clock,
            dedup_window: policy.audit_dedup_window,
        }
    }

    pub fn dedup_window(&self) -> Duration {
        self.dedup_window
    }

    /// Record `action` against `auditable`, returning `None` when an identical event was
    /// written within the dedup window.
    pub fn log(
        &self,
        writer: &mut dyn RecordWriter,
        action: &str,
        actor: Option<&UserId>,
        auditable: &SubjectRef,
        metadata: Metadata,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Event>, RepositoryError> {
        let created_at = created_at.unwrap_or_else(|| self.clock.now());
        let since = created_at - self.dedup_window;

        if let Some(existing) = writer.latest_event_since(action, auditable, since)? {
            debug!(
                action,
                auditable = %auditable,
                existing_event = %existing.id,
                "suppressed duplicate audit event"
            );
            return Ok(None);
        }

        let mut merged = Metadata::new();
        merged.insert(SERVICE_GENERATED_KEY.to_string(), Value::Bool(true));
        merged.extend(metadata);

        let event = writer.insert_event(NewEvent {
            actor_id: actor.cloned(),
            action: action.to_string(),
            auditable: auditable.clone(),
            metadata: merged,
            created_at,
        })?;
        Ok(Some(event))
    }

    /// Same as [`AuditEventRecorder::log`] in a transaction of its own.
    pub fn log_committed<R>(
        &self,
        repository: &R,
        action: &str,
        actor: Option<&UserId>,
        auditable: &SubjectRef,
        metadata: Metadata,
    ) -> Result<Option<Event>, RepositoryError>
    where
        R: EligibilityRepository,
    {
        repository.transaction(|tx| self.log(tx, action, actor, auditable, metadata, None))
    }
}
