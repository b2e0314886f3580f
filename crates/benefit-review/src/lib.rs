//! Review and transition pipeline for benefit eligibility applications: proof review,
//! medical certification tracking, audit logging, notification delivery, and the merged
//! audit timeline shown to reviewers.

pub mod clock;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
