//! Audit events and the merged reviewer timeline.

mod aggregator;
mod certification;
mod entry;
mod export;
mod recorder;

pub use aggregator::{AuditLogAggregator, TimelineRules, TIMELINE_EVENT_ACTIONS};
pub use certification::{collapse_requests, is_certification_entry, RequestEvent, SYSTEM_ACTOR_NAME};
pub use entry::AuditEntry;
pub use export::{summarize, write_csv};
pub use recorder::{AuditEventRecorder, SERVICE_GENERATED_KEY};
