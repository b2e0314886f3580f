//! Benefit eligibility review: proof and certification transitions, the audit trail they
//! leave behind, and the notifications sent along the way.

pub mod audit;
pub mod domain;
pub mod gateways;
pub mod memory;
pub mod notifications;
pub mod records;
pub mod repository;
pub mod router;
pub mod transitions;

#[cfg(test)]
mod tests;

pub use audit::{AuditEntry, AuditEventRecorder, AuditLogAggregator, RequestEvent, TimelineRules};
pub use domain::{
    Application, ApplicationId, ApplicationStatus, AttachmentRef, CertificationStatus,
    MedicalProvider, Metadata, ProofStatus, ProofType, ReviewDecision, SubjectKind, SubjectRef,
    SubmissionMethod, User, UserId, UserKind,
};
pub use gateways::{
    Gateways, MailError, MailMessage, Mailer, ObjectStorage, QueueError, QueuedTask,
    StorageError, TaskQueue, TemplateGroup, UploadedFile, VoucherError, VoucherIssuer,
};
pub use memory::{
    InMemoryEligibilityStore, InMemoryObjectStorage, InMemoryTaskQueue, RecordingMailer,
    SequentialVoucherIssuer,
};
pub use notifications::{
    NotificationBuilder, NotificationConfig, NotificationMode, NotificationOrchestrator,
};
pub use records::{ApplicationStatusChange, DeliveryStatus, Event, Note, Notification, ProofReview};
pub use repository::{EligibilityRepository, RecordWriter, RepositoryError};
pub use router::{eligibility_router, EligibilityApi};
pub use transitions::{
    CertificationInput, SideEffect, StatusTransitionService, TransitionOutcome,
};
