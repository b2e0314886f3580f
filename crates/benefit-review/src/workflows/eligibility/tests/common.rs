use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::clock::ManualClock;
use crate::config::ReviewPolicy;
use crate::workflows::eligibility::audit::AuditLogAggregator;
use crate::workflows::eligibility::domain::{
    Application, ApplicationId, MedicalProvider, NotificationId, SubjectRef, User, UserId,
    UserKind,
};
use crate::workflows::eligibility::gateways::{Gateways, UploadedFile};
use crate::workflows::eligibility::memory::{
    InMemoryEligibilityStore, InMemoryObjectStorage, InMemoryTaskQueue, RecordingMailer,
    SequentialVoucherIssuer,
};
use crate::workflows::eligibility::notifications::{NotificationMode, NotificationOrchestrator};
use crate::workflows::eligibility::records::{
    ApplicationStatusChange, Event, NewEvent, NewNote, NewNotification, NewProofReview,
    NewStatusChange, Note, Notification, NotificationPatch, ProofReview,
};
use crate::workflows::eligibility::repository::{
    EligibilityRepository, RecordWriter, RepositoryError,
};
use crate::workflows::eligibility::router::{eligibility_router, EligibilityApi};
use crate::workflows::eligibility::transitions::StatusTransitionService;

pub(super) const APP_ID: &str = "app-1";

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn app_id() -> ApplicationId {
    ApplicationId::from(APP_ID)
}

pub(super) fn admin() -> User {
    User {
        id: UserId::from("admin-1"),
        kind: UserKind::Administrator,
        first_name: "Dana".to_string(),
        last_name: "Whitfield".to_string(),
        email: "dana.whitfield@example.org".to_string(),
    }
}

pub(super) fn applicant() -> User {
    User {
        id: UserId::from("applicant-1"),
        kind: UserKind::Applicant,
        first_name: "Jordan".to_string(),
        last_name: "Mills".to_string(),
        email: "jordan.mills@example.org".to_string(),
    }
}

pub(super) fn system_actor() -> User {
    User {
        id: UserId::from("system"),
        kind: UserKind::System,
        first_name: "System".to_string(),
        last_name: String::new(),
        email: "no-reply@example.org".to_string(),
    }
}

pub(super) fn provider() -> MedicalProvider {
    MedicalProvider {
        name: "Dr. Alicia Reyes".to_string(),
        email: Some("reyes.clinic@example.org".to_string()),
        fax: Some("515-555-0142".to_string()),
        phone: None,
    }
}

pub(super) fn upload() -> UploadedFile {
    UploadedFile {
        filename: "certification.pdf".to_string(),
        content_type: "application/pdf".to_string(),
        bytes: b"%PDF-1.7 signed".to_vec(),
    }
}

pub(super) fn application_with(id: &str, provider: MedicalProvider) -> Application {
    Application::new(
        ApplicationId::from(id),
        applicant().id,
        provider,
        start(),
    )
}

pub(super) fn seeded_store() -> Arc<InMemoryEligibilityStore> {
    let store = Arc::new(InMemoryEligibilityStore::default());
    for user in [admin(), applicant(), system_actor()] {
        store.insert_user(user).expect("user seeded");
    }
    store
        .insert_application(application_with(APP_ID, provider()))
        .expect("application seeded");
    store
}

/// Service, aggregator, and every in-memory collaborator wired to one clock.
pub(super) struct Harness<R> {
    pub(super) service: Arc<StatusTransitionService<R>>,
    pub(super) aggregator: Arc<AuditLogAggregator<R>>,
    pub(super) repository: Arc<R>,
    pub(super) store: Arc<InMemoryEligibilityStore>,
    pub(super) clock: Arc<ManualClock>,
    pub(super) mailer: Arc<RecordingMailer>,
    pub(super) storage: Arc<InMemoryObjectStorage>,
    pub(super) queue: Arc<InMemoryTaskQueue>,
}

pub(super) fn harness() -> Harness<InMemoryEligibilityStore> {
    let store = seeded_store();
    Harness::build(store.clone(), store, NotificationMode::Strict)
}

pub(super) fn faulty_harness() -> Harness<FaultyRepository> {
    let store = seeded_store();
    let repository = Arc::new(FaultyRepository::new(store.clone()));
    Harness::build(repository, store, NotificationMode::Strict)
}

impl<R> Harness<R>
where
    R: EligibilityRepository + 'static,
{
    pub(super) fn build(
        repository: Arc<R>,
        store: Arc<InMemoryEligibilityStore>,
        mode: NotificationMode,
    ) -> Self {
        let clock = Arc::new(ManualClock::starting_at(start()));
        let mailer = Arc::new(RecordingMailer::default());
        let storage = Arc::new(InMemoryObjectStorage::default());
        let queue = Arc::new(InMemoryTaskQueue::default());
        let gateways = Gateways {
            mailer: mailer.clone(),
            storage: storage.clone(),
            queue: queue.clone(),
            vouchers: Arc::new(SequentialVoucherIssuer::default()),
        };
        let policy = ReviewPolicy::default();
        let service = StatusTransitionService::new(
            repository.clone(),
            gateways,
            clock.clone(),
            policy.clone(),
            system_actor(),
            mode,
        );
        let aggregator = AuditLogAggregator::new(repository.clone(), &policy);

        Self {
            service: Arc::new(service),
            aggregator: Arc::new(aggregator),
            repository,
            store,
            clock,
            mailer,
            storage,
            queue,
        }
    }

    pub(super) fn orchestrator(&self) -> &NotificationOrchestrator<R> {
        self.service.notifications()
    }

    pub(super) fn application(&self) -> Application {
        self.store
            .find_application(&app_id())
            .expect("lookup succeeds")
            .expect("application exists")
    }

    pub(super) fn status_changes(&self) -> Vec<ApplicationStatusChange> {
        self.store.status_changes_for(&app_id()).expect("changes load")
    }

    pub(super) fn events(&self) -> Vec<Event> {
        self.store.all_events().expect("events load")
    }

    pub(super) fn notifications(&self) -> Vec<Notification> {
        self.store.all_notifications().expect("notifications load")
    }

    pub(super) fn router(&self) -> axum::Router {
        eligibility_router(EligibilityApi::new(
            self.service.clone(),
            self.aggregator.clone(),
        ))
    }
}

/// Failures a [`FaultyRepository`] injects into the writes it forwards.
#[derive(Debug, Default)]
pub(super) struct Faults {
    notification_insert: Mutex<Option<RepositoryError>>,
    stale_notification_inserts: AtomicU32,
    note_insert: Mutex<Option<RepositoryError>>,
}

impl Faults {
    pub(super) fn fail_notification_inserts(&self, error: RepositoryError) {
        *self.notification_insert.lock().expect("faults mutex") = Some(error);
    }

    /// The next `count` notification inserts report a stale notifiable.
    pub(super) fn stale_notification_inserts(&self, count: u32) {
        self.stale_notification_inserts
            .store(count, Ordering::SeqCst);
    }

    pub(super) fn fail_note_inserts(&self, error: RepositoryError) {
        *self.note_insert.lock().expect("faults mutex") = Some(error);
    }

    fn notification_failure(&self, notifiable: Option<&SubjectRef>) -> Option<RepositoryError> {
        if let Some(error) = self.notification_insert.lock().expect("faults mutex").clone() {
            return Some(error);
        }
        let subject = notifiable?;
        self.stale_notification_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .ok()
            .map(|_| RepositoryError::StaleReference {
                kind: subject.kind.label(),
                id: subject.id.clone(),
            })
    }
}

/// Wraps the in-memory store and injects write failures inside its transactions.
pub(super) struct FaultyRepository {
    inner: Arc<InMemoryEligibilityStore>,
    pub(super) faults: Faults,
}

impl FaultyRepository {
    pub(super) fn new(inner: Arc<InMemoryEligibilityStore>) -> Self {
        Self {
            inner,
            faults: Faults::default(),
        }
    }
}

impl EligibilityRepository for FaultyRepository {
    fn find_application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        self.inner.find_application(id)
    }

    fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        self.inner.find_user(id)
    }

    fn find_notification(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError> {
        self.inner.find_notification(id)
    }

    fn proof_reviews_for(&self, id: &ApplicationId) -> Result<Vec<ProofReview>, RepositoryError> {
        self.inner.proof_reviews_for(id)
    }

    fn status_changes_for(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<ApplicationStatusChange>, RepositoryError> {
        self.inner.status_changes_for(id)
    }

    fn notifications_for(&self, id: &ApplicationId) -> Result<Vec<Notification>, RepositoryError> {
        self.inner.notifications_for(id)
    }

    fn events_for(&self, id: &ApplicationId) -> Result<Vec<Event>, RepositoryError> {
        self.inner.events_for(id)
    }

    fn notes_for(&self, id: &ApplicationId) -> Result<Vec<Note>, RepositoryError> {
        self.inner.notes_for(id)
    }

    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RecordWriter) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        self.inner.transaction(|tx| {
            let mut writer = FaultyWriter {
                inner: tx,
                faults: &self.faults,
            };
            work(&mut writer)
        })
    }
}

struct FaultyWriter<'a> {
    inner: &'a mut dyn RecordWriter,
    faults: &'a Faults,
}

impl RecordWriter for FaultyWriter<'_> {
    fn find_application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        self.inner.find_application(id)
    }

    fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        self.inner.find_user(id)
    }

    fn reload_subject(&self, subject: &SubjectRef) -> Result<Option<SubjectRef>, RepositoryError> {
        self.inner.reload_subject(subject)
    }

    fn save_application(&mut self, application: &Application) -> Result<(), RepositoryError> {
        self.inner.save_application(application)
    }

    fn insert_proof_review(&mut self, review: NewProofReview) -> Result<ProofReview, RepositoryError> {
        self.inner.insert_proof_review(review)
    }

    fn insert_status_change(
        &mut self,
        change: NewStatusChange,
    ) -> Result<ApplicationStatusChange, RepositoryError> {
        self.inner.insert_status_change(change)
    }

    fn latest_event_since(
        &self,
        action: &str,
        auditable: &SubjectRef,
        since: DateTime<Utc>,
    ) -> Result<Option<Event>, RepositoryError> {
        self.inner.latest_event_since(action, auditable, since)
    }

    fn insert_event(&mut self, event: NewEvent) -> Result<Event, RepositoryError> {
        self.inner.insert_event(event)
    }

    fn insert_notification(
        &mut self,
        notification: NewNotification,
    ) -> Result<Notification, RepositoryError> {
        if let Some(error) = self
            .faults
            .notification_failure(notification.notifiable.as_ref())
        {
            return Err(error);
        }
        self.inner.insert_notification(notification)
    }

    fn find_notification(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError> {
        self.inner.find_notification(id)
    }

    fn update_notification(
        &mut self,
        id: &NotificationId,
        patch: NotificationPatch,
    ) -> Result<Notification, RepositoryError> {
        self.inner.update_notification(id, patch)
    }

    fn update_notification_unchecked(
        &mut self,
        id: &NotificationId,
        patch: NotificationPatch,
    ) -> Result<(), RepositoryError> {
        self.inner.update_notification_unchecked(id, patch)
    }

    fn insert_note(&mut self, note: NewNote) -> Result<Note, RepositoryError> {
        if let Some(error) = self.faults.note_insert.lock().expect("faults mutex").clone() {
            return Err(error);
        }
        self.inner.insert_note(note)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
