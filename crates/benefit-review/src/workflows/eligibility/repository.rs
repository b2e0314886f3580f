use chrono::{DateTime, Utc};

use super::domain::{
    Application, ApplicationId, NotificationId, SubjectRef, User, UserId,
};
use super::records::{
    ApplicationStatusChange, Event, NewEvent, NewNote, NewNotification, NewProofReview,
    NewStatusChange, Note, Notification, NotificationPatch, ProofReview,
};

/// Staged writes for one transaction. Reads observe earlier writes made through the same
/// writer; nothing becomes visible to other readers until the enclosing transaction commits.
pub trait RecordWriter {
    fn find_application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError>;
    fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;

    /// Re-read a polymorphic reference, returning the current canonical form if it still exists.
    fn reload_subject(&self, subject: &SubjectRef) -> Result<Option<SubjectRef>, RepositoryError>;

    fn save_application(&mut self, application: &Application) -> Result<(), RepositoryError>;
    fn insert_proof_review(&mut self, review: NewProofReview) -> Result<ProofReview, RepositoryError>;
    fn insert_status_change(
        &mut self,
        change: NewStatusChange,
    ) -> Result<ApplicationStatusChange, RepositoryError>;

    /// Most recent event with the same action and auditable created at or after `since`.
    fn latest_event_since(
        &self,
        action: &str,
        auditable: &SubjectRef,
        since: DateTime<Utc>,
    ) -> Result<Option<Event>, RepositoryError>;
    fn insert_event(&mut self, event: NewEvent) -> Result<Event, RepositoryError>;

    /// Validates recipient, actor, and notifiable before inserting.
    fn insert_notification(
        &mut self,
        notification: NewNotification,
    ) -> Result<Notification, RepositoryError>;
    fn find_notification(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError>;
    /// Validated update of the mutable notification fields.
    fn update_notification(
        &mut self,
        id: &NotificationId,
        patch: NotificationPatch,
    ) -> Result<Notification, RepositoryError>;
    /// Writes the patch without re-running notification validation.
    fn update_notification_unchecked(
        &mut self,
        id: &NotificationId,
        patch: NotificationPatch,
    ) -> Result<(), RepositoryError>;

    fn insert_note(&mut self, note: NewNote) -> Result<Note, RepositoryError>;
}

/// Storage abstraction so the transition service can be exercised in isolation.
///
/// Read methods return records newest-first. Implementations must not be re-entered from
/// inside a `transaction` closure; use the provided writer for reads there instead.
pub trait EligibilityRepository: Send + Sync {
    fn find_application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError>;
    fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    fn find_notification(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError>;

    fn proof_reviews_for(&self, id: &ApplicationId) -> Result<Vec<ProofReview>, RepositoryError>;
    fn status_changes_for(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<ApplicationStatusChange>, RepositoryError>;
    /// Notifications whose notifiable is the application or one of its proof reviews.
    fn notifications_for(&self, id: &ApplicationId) -> Result<Vec<Notification>, RepositoryError>;
    /// Events auditing the application directly or carrying its id in `application_id` metadata.
    fn events_for(&self, id: &ApplicationId) -> Result<Vec<Event>, RepositoryError>;
    fn notes_for(&self, id: &ApplicationId) -> Result<Vec<Note>, RepositoryError>;

    /// Run `work` atomically: staged writes are applied only when it returns `Ok`.
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&mut dyn RecordWriter) -> Result<T, E>,
        E: From<RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("{kind} reference #{id} is stale")]
    StaleReference { kind: &'static str, id: String },
    #[error("record is invalid: {0}")]
    Invalid(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn is_stale_reference(&self) -> bool {
        matches!(self, RepositoryError::StaleReference { .. })
    }
}
