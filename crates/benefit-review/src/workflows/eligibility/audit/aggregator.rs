use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use super::certification::{collapse_requests, is_certification_entry, RequestEvent};
use super::entry::{newest_first, AuditEntry};
use crate::config::ReviewPolicy;
use crate::workflows::eligibility::domain::{ApplicationId, User, UserId};
use crate::workflows::eligibility::repository::{EligibilityRepository, RepositoryError};

/// Event actions that belong on the reviewer timeline. Delivery bookkeeping
/// (`*_sent`, `*_failed`, `*_created`) stays out.
pub const TIMELINE_EVENT_ACTIONS: &[&str] = &[
    "application_approved",
    "application_rejected",
    "documents_requested",
    "proof_approved",
    "proof_rejected",
    "max_rejections_reached",
    "medical_certification_requested",
    "medical_certification_received",
    "medical_certification_approved",
    "medical_certification_rejected",
];

/// Bucketing and tie-break settings for timeline de-duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineRules {
    pub bucket: Duration,
    pub tie_break: Duration,
}

impl TimelineRules {
    pub fn from_policy(policy: &ReviewPolicy) -> Self {
        Self {
            bucket: policy.timeline_bucket,
            tie_break: policy.timeline_tie_break,
        }
    }

    pub(crate) fn bucket_of(&self, entry: &AuditEntry) -> i64 {
        let width = self.bucket.num_seconds().max(1);
        entry.timestamp().timestamp().div_euclid(width)
    }

    /// Collapse records describing the same moment. Input order is irrelevant: entries are
    /// put in a total order first, then walked oldest to newest so a newer candidate can
    /// displace the incumbent of its group.
    pub fn deduplicate(&self, entries: Vec<AuditEntry>) -> Vec<AuditEntry> {
        let mut ordered = entries;
        ordered.sort_by(newest_first);

        let mut groups: HashMap<(i64, String, Option<String>), usize> = HashMap::new();
        let mut survivors: Vec<AuditEntry> = Vec::with_capacity(ordered.len());

        for candidate in ordered.into_iter().rev() {
            let key = (
                self.bucket_of(&candidate),
                candidate.normalized_type(),
                candidate.provider_name(),
            );
            match groups.get(&key) {
                Some(&slot) => {
                    if self.prefers(&survivors[slot], &candidate) {
                        debug!(
                            kept = candidate.id(),
                            dropped = survivors[slot].id(),
                            "timeline duplicate replaced"
                        );
                        survivors[slot] = candidate;
                    }
                }
                None => {
                    groups.insert(key, survivors.len());
                    survivors.push(candidate);
                }
            }
        }

        survivors.sort_by(newest_first);
        survivors
    }

    fn prefers(&self, incumbent: &AuditEntry, candidate: &AuditEntry) -> bool {
        let (kept_rich, candidate_rich) = (incumbent.has_metadata(), candidate.has_metadata());
        if kept_rich != candidate_rich {
            return candidate_rich;
        }
        if incumbent.priority() != candidate.priority() {
            return candidate.priority() > incumbent.priority();
        }
        candidate.timestamp() - incumbent.timestamp() > self.tie_break
    }
}

/// Read-only merge of proof reviews, status changes, notifications, and audit events for
/// one application.
pub struct AuditLogAggregator<R> {
    repository: Arc<R>,
    rules: TimelineRules,
}

impl<R> AuditLogAggregator<R>
where
    R: EligibilityRepository,
{
    pub fn new(repository: Arc<R>, policy: &ReviewPolicy) -> Self {
        Self {
            repository,
            rules: TimelineRules::from_policy(policy),
        }
    }

    pub fn rules(&self) -> TimelineRules {
        self.rules
    }

    /// Every source record, newest first.
    pub fn build(&self, application_id: &ApplicationId) -> Result<Vec<AuditEntry>, RepositoryError> {
        let reviews = self.repository.proof_reviews_for(application_id)?;
        let changes = self.repository.status_changes_for(application_id)?;
        let notifications = self.repository.notifications_for(application_id)?;
        let events = self.repository.events_for(application_id)?;

        let mut entries: Vec<AuditEntry> = reviews
            .into_iter()
            .map(AuditEntry::ProofReview)
            .chain(changes.into_iter().map(AuditEntry::StatusChange))
            .chain(notifications.into_iter().map(AuditEntry::Notification))
            .chain(
                events
                    .into_iter()
                    .filter(|event| TIMELINE_EVENT_ACTIONS.contains(&event.action.as_str()))
                    .map(AuditEntry::Event),
            )
            .filter(|entry| entry.references(application_id))
            .collect();

        entries.sort_by(newest_first);
        Ok(entries)
    }

    pub fn build_deduplicated(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        Ok(self.rules.deduplicate(self.build(application_id)?))
    }

    /// Deduplicated entries that concern medical certification.
    pub fn certification_events(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        Ok(self
            .build_deduplicated(application_id)?
            .into_iter()
            .filter(is_certification_entry)
            .collect())
    }

    /// Certification requests collapsed to one row per bucket.
    pub fn request_events(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<RequestEvent>, RepositoryError> {
        let entries = self.certification_events(application_id)?;
        let names = self.actors(&entries)?;
        Ok(collapse_requests(&entries, &self.rules, |id| {
            names.get(id).map(User::full_name)
        }))
    }

    /// Users referenced as actors by `entries`, keyed by id.
    pub fn actors(&self, entries: &[AuditEntry]) -> Result<HashMap<UserId, User>, RepositoryError> {
        let mut users = HashMap::new();
        for id in entries.iter().filter_map(AuditEntry::actor_id) {
            if users.contains_key(id) {
                continue;
            }
            if let Some(user) = self.repository.find_user(id)? {
                users.insert(id.clone(), user);
            }
        }
        Ok(users)
    }
}
