use std::borrow::Cow;
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflows::eligibility::domain::{
    ApplicationId, Metadata, ReviewDecision, SubjectRef, UserId,
};
use crate::workflows::eligibility::notifications::MEDICAL_CERTIFICATION_PREFIX;
use crate::workflows::eligibility::records::{
    ApplicationStatusChange, Event, Notification, ProofReview,
};

/// One record on the merged audit timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum AuditEntry {
    ProofReview(ProofReview),
    StatusChange(ApplicationStatusChange),
    Notification(Notification),
    Event(Event),
}

impl AuditEntry {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AuditEntry::ProofReview(review) => review.reviewed_at,
            AuditEntry::StatusChange(change) => change.created_at,
            AuditEntry::Notification(notification) => notification.created_at,
            AuditEntry::Event(event) => event.created_at,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            AuditEntry::ProofReview(_) => "proof_review",
            AuditEntry::StatusChange(_) => "status_change",
            AuditEntry::Notification(_) => "notification",
            AuditEntry::Event(_) => "event",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            AuditEntry::ProofReview(review) => &review.id.0,
            AuditEntry::StatusChange(change) => &change.id.0,
            AuditEntry::Notification(notification) => &notification.id.0,
            AuditEntry::Event(event) => &event.id.0,
        }
    }

    pub fn actor_id(&self) -> Option<&UserId> {
        match self {
            AuditEntry::ProofReview(review) => Some(&review.admin_id),
            AuditEntry::StatusChange(change) => Some(&change.user_id),
            AuditEntry::Notification(notification) => Some(&notification.actor_id),
            AuditEntry::Event(event) => event.actor_id.as_ref(),
        }
    }

    /// Action name as it would appear in a notification or event.
    pub fn action(&self) -> Cow<'_, str> {
        match self {
            AuditEntry::ProofReview(review) => match review.status {
                ReviewDecision::Approved => Cow::Borrowed("proof_approved"),
                ReviewDecision::Rejected => {
                    Cow::Owned(format!("{}_proof_rejected", review.proof_type.label()))
                }
            },
            AuditEntry::StatusChange(change) => {
                if change.is_certification_change() {
                    Cow::Owned(format!("{MEDICAL_CERTIFICATION_PREFIX}{}", change.to_status))
                } else {
                    Cow::Borrowed(change.to_status.as_str())
                }
            }
            AuditEntry::Notification(notification) => Cow::Borrowed(&notification.action),
            AuditEntry::Event(event) => Cow::Borrowed(&event.action),
        }
    }

    pub fn subject(&self) -> Option<SubjectRef> {
        match self {
            AuditEntry::ProofReview(review) => Some(SubjectRef::application(&review.application_id)),
            AuditEntry::StatusChange(change) => Some(SubjectRef::application(&change.application_id)),
            AuditEntry::Notification(notification) => notification.notifiable.clone(),
            AuditEntry::Event(event) => Some(event.auditable.clone()),
        }
    }

    pub fn metadata(&self) -> Cow<'_, Metadata> {
        match self {
            AuditEntry::ProofReview(review) => {
                let mut metadata = Metadata::new();
                metadata.insert(
                    "proof_type".to_string(),
                    Value::String(review.proof_type.label().to_string()),
                );
                if let Some(reason) = &review.rejection_reason {
                    metadata.insert("rejection_reason".to_string(), Value::String(reason.clone()));
                }
                Cow::Owned(metadata)
            }
            AuditEntry::StatusChange(change) => Cow::Borrowed(&change.metadata),
            AuditEntry::Notification(notification) => Cow::Borrowed(&notification.metadata),
            AuditEntry::Event(event) => Cow::Borrowed(&event.metadata),
        }
    }

    /// Type used for duplicate detection. Proof reviews never collide with anything.
    pub fn normalized_type(&self) -> String {
        match self {
            AuditEntry::ProofReview(review) => format!("{}_{}", self.kind(), review.id),
            AuditEntry::StatusChange(_)
            | AuditEntry::Notification(_)
            | AuditEntry::Event(_) => self.action().into_owned(),
        }
    }

    pub fn provider_name(&self) -> Option<String> {
        self.metadata()
            .get("provider_name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    /// At least one metadata value carries information.
    pub fn has_metadata(&self) -> bool {
        self.metadata().values().any(|value| match value {
            Value::Null => false,
            Value::String(text) => !text.trim().is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::Bool(_) | Value::Number(_) => true,
        })
    }

    /// Collision priority: status changes first, then events, then everything else.
    pub(crate) const fn priority(&self) -> u8 {
        match self {
            AuditEntry::StatusChange(_) => 2,
            AuditEntry::Event(_) => 1,
            AuditEntry::Notification(_) | AuditEntry::ProofReview(_) => 0,
        }
    }

    const fn kind_rank(&self) -> u8 {
        match self {
            AuditEntry::StatusChange(_) => 0,
            AuditEntry::Event(_) => 1,
            AuditEntry::Notification(_) => 2,
            AuditEntry::ProofReview(_) => 3,
        }
    }

    /// Does this record concern `application_id`, directly or through metadata?
    pub fn references(&self, application_id: &ApplicationId) -> bool {
        let through_metadata = self
            .metadata()
            .get("application_id")
            .and_then(Value::as_str)
            .map(|id| id == application_id.0)
            .unwrap_or(false);
        let direct = match self {
            AuditEntry::ProofReview(review) => &review.application_id == application_id,
            AuditEntry::StatusChange(change) => &change.application_id == application_id,
            AuditEntry::Notification(_) | AuditEntry::Event(_) => self
                .subject()
                .map(|subject| subject == SubjectRef::application(application_id))
                .unwrap_or(false),
        };
        direct || through_metadata
    }
}

/// Newest first; ties broken by kind then id so the order never depends on input order.
pub(crate) fn newest_first(left: &AuditEntry, right: &AuditEntry) -> Ordering {
    right
        .timestamp()
        .cmp(&left.timestamp())
        .then_with(|| left.kind_rank().cmp(&right.kind_rank()))
        .then_with(|| left.id().cmp(right.id()))
}
