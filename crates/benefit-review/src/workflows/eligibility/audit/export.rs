use std::collections::HashMap;
use std::io;

use super::certification::SYSTEM_ACTOR_NAME;
use super::entry::AuditEntry;
use crate::workflows::eligibility::domain::{User, UserId};
use crate::workflows::eligibility::notifications::{compose, humanize};
use crate::workflows::eligibility::records::CHANGE_TYPE_KEY;

/// Write `entries` as CSV with a header row: timestamp, kind, action, actor, summary.
pub fn write_csv<W: io::Write>(
    entries: &[AuditEntry],
    actors: &HashMap<UserId, User>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["timestamp", "kind", "action", "actor", "summary"])?;

    for entry in entries {
        let actor = entry.actor_id().and_then(|id| actors.get(id));
        let actor_name = actor
            .map(User::full_name)
            .unwrap_or_else(|| SYSTEM_ACTOR_NAME.to_string());
        csv.write_record([
            entry.timestamp().to_rfc3339(),
            entry.kind().to_string(),
            entry.action().into_owned(),
            actor_name,
            summarize(entry, actor),
        ])?;
    }

    csv.flush()?;
    Ok(())
}

/// Display text for a timeline row.
pub fn summarize(entry: &AuditEntry, actor: Option<&User>) -> String {
    match entry {
        AuditEntry::StatusChange(change) if !change.is_certification_change() => {
            let dimension = change
                .metadata
                .get(CHANGE_TYPE_KEY)
                .and_then(|value| value.as_str())
                .map(humanize)
                .unwrap_or_else(|| "Status".to_string());
            format!(
                "{dimension} changed from {} to {}.",
                change.from_status.replace('_', " "),
                change.to_status.replace('_', " ")
            )
        }
        _ => compose(
            &entry.action(),
            entry.subject().as_ref(),
            actor,
            &entry.metadata(),
        ),
    }
}
