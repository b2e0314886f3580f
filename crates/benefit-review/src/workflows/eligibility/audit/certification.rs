use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::aggregator::TimelineRules;
use super::entry::AuditEntry;
use crate::workflows::eligibility::domain::UserId;

pub const SYSTEM_ACTOR_NAME: &str = "System";

const CERTIFICATION: &str = "certification";

/// One certification request as shown to reviewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub timestamp: DateTime<Utc>,
    pub actor_name: String,
    pub submission_method: Option<String>,
}

/// Mentions certification in its action, status target, or metadata.
pub fn is_certification_entry(entry: &AuditEntry) -> bool {
    if entry.action().contains(CERTIFICATION) {
        return true;
    }
    if let AuditEntry::StatusChange(change) = entry {
        if change.to_status.contains(CERTIFICATION) {
            return true;
        }
    }
    serde_json::to_string(entry.metadata().as_ref())
        .map(|serialized| serialized.contains(CERTIFICATION))
        .unwrap_or(false)
}

fn is_request_entry(entry: &AuditEntry) -> bool {
    let action = entry.action();
    action.contains(CERTIFICATION) && action.ends_with("_requested")
}

fn submission_method(entry: &AuditEntry) -> Option<String> {
    entry
        .metadata()
        .get("submission_method")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|method| !method.is_empty())
        .map(str::to_string)
}

/// Reduce request records to one per bucket, keeping timeline order. A later record in
/// the same bucket replaces the kept one only when it adds a missing submission method.
pub fn collapse_requests<F>(
    entries: &[AuditEntry],
    rules: &TimelineRules,
    name_of: F,
) -> Vec<RequestEvent>
where
    F: Fn(&UserId) -> Option<String>,
{
    let mut kept: Vec<(i64, RequestEvent)> = Vec::new();

    for entry in entries.iter().filter(|entry| is_request_entry(entry)) {
        let bucket = rules.bucket_of(entry);
        let request = RequestEvent {
            timestamp: entry.timestamp(),
            actor_name: entry
                .actor_id()
                .and_then(&name_of)
                .unwrap_or_else(|| SYSTEM_ACTOR_NAME.to_string()),
            submission_method: submission_method(entry),
        };

        match kept.iter_mut().find(|(existing, _)| *existing == bucket) {
            Some((_, existing)) => {
                if existing.submission_method.is_none() && request.submission_method.is_some() {
                    *existing = request;
                }
            }
            None => kept.push((bucket, request)),
        }
    }

    kept.into_iter().map(|(_, request)| request).collect()
}
