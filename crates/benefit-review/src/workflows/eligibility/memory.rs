//! In-process implementations of the storage and gateway traits. The API binary uses them
//! for demos and local runs; the test suites wrap them to inject failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{
    Application, ApplicationId, ApplicationStatus, AttachmentRef, EventId, NoteId,
    NotificationId, ProofReviewId, StatusChangeId, SubjectKind, SubjectRef, User, UserId,
};
use super::gateways::{
    MailError, MailMessage, Mailer, ObjectStorage, QueueError, QueuedTask, StorageError,
    TaskQueue, UploadedFile, VoucherError, VoucherIssuer,
};
use super::records::{
    ApplicationStatusChange, DeliveryStatus, Event, NewEvent, NewNote, NewNotification,
    NewProofReview, NewStatusChange, Note, Notification, NotificationPatch, ProofReview,
};
use super::repository::{EligibilityRepository, RecordWriter, RepositoryError};

#[derive(Debug, Default, Clone)]
struct StoreState {
    applications: HashMap<ApplicationId, Application>,
    users: HashMap<UserId, User>,
    proof_reviews: Vec<ProofReview>,
    status_changes: Vec<ApplicationStatusChange>,
    notifications: Vec<Notification>,
    events: Vec<Event>,
    notes: Vec<Note>,
    sequence: u64,
}

impl StoreState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}-{:06}", self.sequence)
    }

    fn subject_exists(&self, subject: &SubjectRef) -> bool {
        match subject.kind {
            SubjectKind::Application => self
                .applications
                .contains_key(&ApplicationId(subject.id.clone())),
            SubjectKind::ProofReview => self.proof_reviews.iter().any(|r| r.id.0 == subject.id),
            SubjectKind::User => self.users.contains_key(&UserId(subject.id.clone())),
            SubjectKind::ApplicationStatusChange => {
                self.status_changes.iter().any(|c| c.id.0 == subject.id)
            }
            SubjectKind::Notification => self.notifications.iter().any(|n| n.id.0 == subject.id),
        }
    }

    fn belongs_to(&self, subject: &SubjectRef, application_id: &ApplicationId) -> bool {
        match subject.kind {
            SubjectKind::Application => subject.id == application_id.0,
            SubjectKind::ProofReview => self
                .proof_reviews
                .iter()
                .any(|review| review.id.0 == subject.id && &review.application_id == application_id),
            _ => false,
        }
    }
}

fn newest_first<T, F>(mut items: Vec<T>, timestamp: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by_key(|item| std::cmp::Reverse(timestamp(item)));
    items
}

/// Mutex-guarded store. Transactions hold the lock for their whole duration and work on a
/// copy of the state that replaces the original only on success.
#[derive(Debug, Default)]
pub struct InMemoryEligibilityStore {
    state: Mutex<StoreState>,
}

impl InMemoryEligibilityStore {
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }

    pub fn insert_user(&self, user: User) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        if guard.users.contains_key(&user.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.users.insert(user.id.clone(), user);
        Ok(())
    }

    pub fn insert_application(&self, application: Application) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        if guard.applications.contains_key(&application.id) {
            return Err(RepositoryError::Conflict);
        }
        guard
            .applications
            .insert(application.id.clone(), application);
        Ok(())
    }

    pub fn applications_with_status(
        &self,
        status: ApplicationStatus,
    ) -> Result<Vec<Application>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .applications
            .values()
            .filter(|application| application.status == status)
            .cloned()
            .collect())
    }

    pub fn all_events(&self) -> Result<Vec<Event>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard.events.clone())
    }

    pub fn all_notifications(&self) -> Result<Vec<Notification>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard.notifications.clone())
    }
}

impl EligibilityRepository for InMemoryEligibilityStore {
    fn find_application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Ok(self.lock()?.applications.get(id).cloned())
    }

    fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    fn find_notification(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError> {
        Ok(self
            .lock()?
            .notifications
            .iter()
            .find(|notification| &notification.id == id)
            .cloned())
    }

    fn proof_reviews_for(&self, id: &ApplicationId) -> Result<Vec<ProofReview>, RepositoryError> {
        let guard = self.lock()?;
        let rows: Vec<ProofReview> = guard
            .proof_reviews
            .iter()
            .filter(|review| &review.application_id == id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |review: &ProofReview| review.reviewed_at))
    }

    fn status_changes_for(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<ApplicationStatusChange>, RepositoryError> {
        let guard = self.lock()?;
        let rows: Vec<ApplicationStatusChange> = guard
            .status_changes
            .iter()
            .filter(|change| &change.application_id == id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |change: &ApplicationStatusChange| {
            change.created_at
        }))
    }

    fn notifications_for(&self, id: &ApplicationId) -> Result<Vec<Notification>, RepositoryError> {
        let guard = self.lock()?;
        let rows: Vec<Notification> = guard
            .notifications
            .iter()
            .filter(|notification| {
                notification
                    .notifiable
                    .as_ref()
                    .map(|subject| guard.belongs_to(subject, id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(newest_first(rows, |notification: &Notification| {
            notification.created_at
        }))
    }

    fn events_for(&self, id: &ApplicationId) -> Result<Vec<Event>, RepositoryError> {
        let guard = self.lock()?;
        let rows: Vec<Event> = guard
            .events
            .iter()
            .filter(|event| {
                guard.belongs_to(&event.auditable, id)
                    || event
                        .metadata
                        .get("application_id")
                        .and_then(|value| value.as_str())
                        .map(|value| value == id.0)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(newest_first(rows, |event: &Event| event.created_at))
    }

    fn notes_for(&self, id: &ApplicationId) -> Result<Vec<Note>, RepositoryError> {
        let guard = self.lock()?;
        let rows: Vec<Note> = guard
            .notes
            .iter()
            .filter(|note| &note.application_id == id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |note: &Note| note.created_at))
    }

    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RecordWriter) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut guard = self.lock()?;
        let mut staged = MemoryTransaction {
            state: guard.clone(),
        };
        let value = work(&mut staged)?;
        *guard = staged.state;
        Ok(value)
    }
}

struct MemoryTransaction {
    state: StoreState,
}

impl MemoryTransaction {
    fn notification_mut(&mut self, id: &NotificationId) -> Result<&mut Notification, RepositoryError> {
        self.state
            .notifications
            .iter_mut()
            .find(|notification| &notification.id == id)
            .ok_or(RepositoryError::NotFound)
    }
}

impl RecordWriter for MemoryTransaction {
    fn find_application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Ok(self.state.applications.get(id).cloned())
    }

    fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.users.get(id).cloned())
    }

    fn reload_subject(&self, subject: &SubjectRef) -> Result<Option<SubjectRef>, RepositoryError> {
        Ok(self
            .state
            .subject_exists(subject)
            .then(|| subject.clone()))
    }

    fn save_application(&mut self, application: &Application) -> Result<(), RepositoryError> {
        match self.state.applications.get_mut(&application.id) {
            Some(existing) => {
                *existing = application.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn insert_proof_review(&mut self, review: NewProofReview) -> Result<ProofReview, RepositoryError> {
        if !self.state.applications.contains_key(&review.application_id) {
            return Err(RepositoryError::Invalid("application must exist".to_string()));
        }
        let row = ProofReview {
            id: ProofReviewId(self.state.next_id("prf")),
            application_id: review.application_id,
            admin_id: review.admin_id,
            proof_type: review.proof_type,
            status: review.status,
            rejection_reason: review.rejection_reason,
            notes: review.notes,
            reviewed_at: review.reviewed_at,
        };
        self.state.proof_reviews.push(row.clone());
        Ok(row)
    }

    fn insert_status_change(
        &mut self,
        change: NewStatusChange,
    ) -> Result<ApplicationStatusChange, RepositoryError> {
        let row = ApplicationStatusChange {
            id: StatusChangeId(self.state.next_id("chg")),
            application_id: change.application_id,
            user_id: change.user_id,
            from_status: change.from_status,
            to_status: change.to_status,
            metadata: change.metadata,
            notes: change.notes,
            created_at: change.created_at,
        };
        self.state.status_changes.push(row.clone());
        Ok(row)
    }

    fn latest_event_since(
        &self,
        action: &str,
        auditable: &SubjectRef,
        since: DateTime<Utc>,
    ) -> Result<Option<Event>, RepositoryError> {
        Ok(self
            .state
            .events
            .iter()
            .filter(|event| {
                event.action == action && &event.auditable == auditable && event.created_at >= since
            })
            .max_by_key(|event| event.created_at)
            .cloned())
    }

    fn insert_event(&mut self, event: NewEvent) -> Result<Event, RepositoryError> {
        let row = Event {
            id: EventId(self.state.next_id("evt")),
            actor_id: event.actor_id,
            action: event.action,
            auditable: event.auditable,
            metadata: event.metadata,
            created_at: event.created_at,
        };
        self.state.events.push(row.clone());
        Ok(row)
    }

    fn insert_notification(
        &mut self,
        notification: NewNotification,
    ) -> Result<Notification, RepositoryError> {
        if !self.state.users.contains_key(&notification.recipient_id) {
            return Err(RepositoryError::Invalid("recipient must exist".to_string()));
        }
        if !self.state.users.contains_key(&notification.actor_id) {
            return Err(RepositoryError::Invalid("actor must exist".to_string()));
        }
        if let Some(subject) = &notification.notifiable {
            if !self.state.subject_exists(subject) {
                return Err(RepositoryError::StaleReference {
                    kind: subject.kind.label(),
                    id: subject.id.clone(),
                });
            }
        }

        let row = Notification {
            id: NotificationId(self.state.next_id("ntf")),
            recipient_id: notification.recipient_id,
            actor_id: notification.actor_id,
            action: notification.action,
            notifiable: notification.notifiable,
            metadata: notification.metadata,
            delivery_status: DeliveryStatus::Pending,
            read_at: None,
            created_at: notification.created_at,
        };
        self.state.notifications.push(row.clone());
        Ok(row)
    }

    fn find_notification(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError> {
        Ok(self
            .state
            .notifications
            .iter()
            .find(|notification| &notification.id == id)
            .cloned())
    }

    fn update_notification(
        &mut self,
        id: &NotificationId,
        patch: NotificationPatch,
    ) -> Result<Notification, RepositoryError> {
        let notifiable = self
            .state
            .notifications
            .iter()
            .find(|notification| &notification.id == id)
            .ok_or(RepositoryError::NotFound)?
            .notifiable
            .clone();
        if let Some(subject) = notifiable {
            if !self.state.subject_exists(&subject) {
                return Err(RepositoryError::StaleReference {
                    kind: subject.kind.label(),
                    id: subject.id,
                });
            }
        }

        let row = self.notification_mut(id)?;
        row.metadata = patch.metadata;
        row.delivery_status = patch.delivery_status;
        row.read_at = patch.read_at;
        Ok(row.clone())
    }

    fn update_notification_unchecked(
        &mut self,
        id: &NotificationId,
        patch: NotificationPatch,
    ) -> Result<(), RepositoryError> {
        let row = self.notification_mut(id)?;
        row.metadata = patch.metadata;
        row.delivery_status = patch.delivery_status;
        row.read_at = patch.read_at;
        Ok(())
    }

    fn insert_note(&mut self, note: NewNote) -> Result<Note, RepositoryError> {
        if note.body.trim().is_empty() {
            return Err(RepositoryError::Invalid("note body can't be blank".to_string()));
        }
        let row = Note {
            id: NoteId(self.state.next_id("note")),
            application_id: note.application_id,
            author_id: note.author_id,
            body: note.body,
            created_at: note.created_at,
        };
        self.state.notes.push(row.clone());
        Ok(row)
    }
}

/// Mail transport that records every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
    failure: Mutex<Option<MailError>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Make every following delivery fail with `error` (or succeed again with `None`).
    pub fn fail_with(&self, error: Option<MailError>) {
        if let Ok(mut guard) = self.failure.lock() {
            *guard = error;
        }
    }
}

impl Mailer for RecordingMailer {
    fn deliver(&self, message: MailMessage) -> Result<(), MailError> {
        if let Some(error) = self.failure.lock().ok().and_then(|guard| guard.clone()) {
            return Err(error);
        }
        self.sent
            .lock()
            .map_err(|_| MailError::Transport("mailer mutex poisoned".to_string()))?
            .push(message);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StorageState {
    blobs: HashMap<String, String>,
    visible: HashMap<ApplicationId, AttachmentRef>,
    pending: HashMap<ApplicationId, AttachmentRef>,
}

/// Object storage with optional read-after-write lag so verification retries can be exercised.
#[derive(Debug, Default)]
pub struct InMemoryObjectStorage {
    state: Mutex<StorageState>,
    sequence: AtomicU64,
    lagging_attaches: AtomicU32,
    drop_attaches: AtomicBool,
}

pub const SIGNED_ID_PREFIX: &str = "signed:";

impl InMemoryObjectStorage {
    fn lock(&self) -> Result<MutexGuard<'_, StorageState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Unavailable("storage mutex poisoned".to_string()))
    }

    /// The next `count` attaches only become visible after a `reset`.
    pub fn lag_next_attaches(&self, count: u32) {
        self.lagging_attaches.store(count, Ordering::SeqCst);
    }

    /// Attaches are accepted but never become visible.
    pub fn drop_attaches(&self, enabled: bool) {
        self.drop_attaches.store(enabled, Ordering::SeqCst);
    }

    pub fn signed_id_for(attachment: &AttachmentRef) -> String {
        format!("{SIGNED_ID_PREFIX}{}", attachment.blob_key)
    }

    pub fn attachment_for(&self, application_id: &ApplicationId) -> Option<AttachmentRef> {
        self.lock()
            .ok()
            .and_then(|guard| guard.visible.get(application_id).cloned())
    }
}

impl ObjectStorage for InMemoryObjectStorage {
    fn store_upload(&self, upload: &UploadedFile) -> Result<AttachmentRef, StorageError> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let blob_key = format!("blob-{id:06}");
        self.lock()?
            .blobs
            .insert(blob_key.clone(), upload.filename.clone());
        Ok(AttachmentRef {
            blob_key,
            filename: Some(upload.filename.clone()),
        })
    }

    fn resolve_signed_id(&self, signed_id: &str) -> Result<AttachmentRef, StorageError> {
        let key = signed_id
            .strip_prefix(SIGNED_ID_PREFIX)
            .ok_or(StorageError::InvalidSignedId)?;
        let guard = self.lock()?;
        let filename = guard
            .blobs
            .get(key)
            .ok_or_else(|| StorageError::MissingBlob(key.to_string()))?;
        Ok(AttachmentRef {
            blob_key: key.to_string(),
            filename: Some(filename.clone()),
        })
    }

    fn attach(
        &self,
        application_id: &ApplicationId,
        attachment: &AttachmentRef,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.blobs.contains_key(&attachment.blob_key) {
            return Err(StorageError::MissingBlob(attachment.blob_key.clone()));
        }
        if self.drop_attaches.load(Ordering::SeqCst) {
            return Ok(());
        }
        let lagging = self
            .lagging_attaches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if lagging {
            guard.pending.insert(application_id.clone(), attachment.clone());
        } else {
            guard.visible.insert(application_id.clone(), attachment.clone());
        }
        Ok(())
    }

    fn is_attached(
        &self,
        application_id: &ApplicationId,
        attachment: &AttachmentRef,
    ) -> Result<bool, StorageError> {
        Ok(self.lock()?.visible.get(application_id) == Some(attachment))
    }

    fn reset(&self, application_id: &ApplicationId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if let Some(pending) = guard.pending.remove(application_id) {
            guard.visible.insert(application_id.clone(), pending);
        }
        Ok(())
    }

    fn detach(&self, application_id: &ApplicationId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.visible.remove(application_id);
        guard.pending.remove(application_id);
        Ok(())
    }
}

/// Queue that keeps tasks in memory for a worker (or a test) to drain.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    tasks: Mutex<Vec<QueuedTask>>,
    unavailable: AtomicBool,
}

impl InMemoryTaskQueue {
    pub fn tasks(&self) -> Vec<QueuedTask> {
        self.tasks
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn drain(&self) -> Vec<QueuedTask> {
        self.tasks
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Run every queued task once. Tasks whose run fails go back to the front of the queue
    /// for the next pass; returns how many were put back.
    pub fn process<E, F>(&self, mut run: F) -> usize
    where
        F: FnMut(&QueuedTask) -> Result<(), E>,
    {
        let mut retry: Vec<QueuedTask> = self
            .drain()
            .into_iter()
            .filter(|task| run(task).is_err())
            .collect();
        let requeued = retry.len();
        if requeued > 0 {
            let mut guard = self
                .tasks
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            retry.append(&mut guard);
            *guard = retry;
        }
        requeued
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn enqueue(&self, task: QueuedTask) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("queue offline".to_string()));
        }
        self.tasks
            .lock()
            .map_err(|_| QueueError::Unavailable("queue mutex poisoned".to_string()))?
            .push(task);
        Ok(())
    }
}

/// Issues sequential voucher codes for every approved application.
#[derive(Debug, Default)]
pub struct SequentialVoucherIssuer {
    sequence: AtomicU64,
}

impl VoucherIssuer for SequentialVoucherIssuer {
    fn issue_if_eligible(&self, application: &Application) -> Result<Option<String>, VoucherError> {
        if application.status != ApplicationStatus::Approved {
            return Ok(None);
        }
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Some(format!("VCH-{id:06}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 3, 10, 0, 0).single().expect("valid")
    }

    #[test]
    fn failed_transaction_discards_staged_writes() {
        let store = InMemoryEligibilityStore::default();
        let result: Result<(), RepositoryError> = store.transaction(|tx| {
            tx.insert_event(NewEvent {
                actor_id: None,
                action: "application_approved".to_string(),
                auditable: SubjectRef::application(&ApplicationId::from("app-1")),
                metadata: Default::default(),
                created_at: timestamp(),
            })?;
            Err(RepositoryError::Unavailable("forced".to_string()))
        });
        assert!(result.is_err());
        assert!(store.all_events().expect("events").is_empty());
    }

    #[test]
    fn failed_tasks_stay_queued_for_the_next_pass() {
        let queue = InMemoryTaskQueue::default();
        let task = |count| QueuedTask::ProviderCertificationRequest {
            application_id: ApplicationId::from("app-1"),
            notification_id: None,
            request_count: count,
        };
        queue.enqueue(task(1)).expect("queued");
        queue.enqueue(task(2)).expect("queued");

        let requeued = queue.process(|queued| match queued {
            QueuedTask::ProviderCertificationRequest { request_count: 1, .. } => {
                Err(RepositoryError::Unavailable("store offline".to_string()))
            }
            _ => Ok(()),
        });

        assert_eq!(requeued, 1);
        assert_eq!(queue.tasks(), vec![task(1)]);

        let mut runs = 0;
        let requeued = queue.process(|_| {
            runs += 1;
            Ok::<(), RepositoryError>(())
        });
        assert_eq!((requeued, runs), (0, 1));
        assert!(queue.tasks().is_empty());
    }

    #[test]
    fn lagging_attach_becomes_visible_after_reset() {
        let storage = InMemoryObjectStorage::default();
        let app = ApplicationId::from("app-1");
        let blob = storage
            .store_upload(&UploadedFile {
                filename: "cert.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                bytes: vec![1, 2, 3],
            })
            .expect("stored");
        storage.lag_next_attaches(1);
        storage.attach(&app, &blob).expect("attached");
        assert!(!storage.is_attached(&app, &blob).expect("checked"));
        storage.reset(&app).expect("reset");
        assert!(storage.is_attached(&app, &blob).expect("checked"));
    }
}
