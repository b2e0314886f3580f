use benefit_review::clock::Clock;
use benefit_review::config::{AppEnvironment, ReviewPolicy};
use benefit_review::workflows::eligibility::{
    Application, ApplicationId, AuditLogAggregator, EligibilityApi, Gateways,
    InMemoryEligibilityStore, InMemoryObjectStorage, InMemoryTaskQueue, MedicalProvider,
    NotificationMode, RecordingMailer, RepositoryError, SequentialVoucherIssuer,
    StatusTransitionService, User, UserId, UserKind,
};
use chrono::{DateTime, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub(crate) const SYSTEM_USER_ID: &str = "system";
pub(crate) const REVIEWER_ID: &str = "admin-1";
pub(crate) const APPLICANT_ID: &str = "applicant-1";
pub(crate) const SAMPLE_APPLICATION_ID: &str = "app-1001";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Review pipeline wired against the in-memory store and gateways.
pub(crate) struct ReviewStack {
    pub(crate) api: EligibilityApi<InMemoryEligibilityStore>,
    pub(crate) store: Arc<InMemoryEligibilityStore>,
    pub(crate) storage: Arc<InMemoryObjectStorage>,
    pub(crate) queue: Arc<InMemoryTaskQueue>,
    pub(crate) mailer: Arc<RecordingMailer>,
}

pub(crate) fn system_user() -> User {
    User {
        id: UserId::from(SYSTEM_USER_ID),
        kind: UserKind::System,
        first_name: "System".to_string(),
        last_name: String::new(),
        email: "no-reply@benefits.example.org".to_string(),
    }
}

pub(crate) fn reviewer() -> User {
    User {
        id: UserId::from(REVIEWER_ID),
        kind: UserKind::Administrator,
        first_name: "Morgan".to_string(),
        last_name: "Ellis".to_string(),
        email: "morgan.ellis@benefits.example.org".to_string(),
    }
}

pub(crate) fn applicant() -> User {
    User {
        id: UserId::from(APPLICANT_ID),
        kind: UserKind::Applicant,
        first_name: "Jordan".to_string(),
        last_name: "Alvarez".to_string(),
        email: "jordan.alvarez@example.org".to_string(),
    }
}

pub(crate) fn sample_provider() -> MedicalProvider {
    MedicalProvider {
        name: "Dr. Lena Hart".to_string(),
        email: Some("lena.hart@northside-clinic.example.org".to_string()),
        fax: Some("555-0142".to_string()),
        phone: Some("555-0100".to_string()),
    }
}

pub(crate) fn build_stack(
    policy: &ReviewPolicy,
    environment: AppEnvironment,
    clock: Arc<dyn Clock>,
) -> ReviewStack {
    let store = Arc::new(InMemoryEligibilityStore::default());
    let storage = Arc::new(InMemoryObjectStorage::default());
    let queue = Arc::new(InMemoryTaskQueue::default());
    let mailer = Arc::new(RecordingMailer::default());
    let gateways = Gateways {
        mailer: mailer.clone(),
        storage: storage.clone(),
        queue: queue.clone(),
        vouchers: Arc::new(SequentialVoucherIssuer::default()),
    };

    let transitions = Arc::new(StatusTransitionService::new(
        store.clone(),
        gateways,
        clock,
        policy.clone(),
        system_user(),
        NotificationMode::for_environment(environment),
    ));
    let timeline = Arc::new(AuditLogAggregator::new(store.clone(), policy));

    ReviewStack {
        api: EligibilityApi::new(transitions, timeline),
        store,
        storage,
        queue,
        mailer,
    }
}

/// Runs queued tasks on a fixed cadence. A task that errors stays queued for the next tick.
pub(crate) fn spawn_queue_worker(stack: &ReviewStack, every: Duration) -> tokio::task::JoinHandle<()> {
    let transitions = stack.api.transitions.clone();
    let queue = stack.queue.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let requeued = queue.process(|task| {
                match transitions.notifications().perform_task(task) {
                    Ok(outcome) => {
                        debug!(?task, ?outcome, "queued task performed");
                        Ok(())
                    }
                    Err(error) => {
                        warn!(?task, %error, "queued task failed");
                        Err(error)
                    }
                }
            });
            if requeued > 0 {
                debug!(requeued, "tasks kept for retry");
            }
        }
    })
}

/// Seeds the system account, one reviewer, and one in-progress application.
pub(crate) fn seed_reference_data(
    store: &InMemoryEligibilityStore,
    now: DateTime<Utc>,
) -> Result<ApplicationId, RepositoryError> {
    for user in [system_user(), reviewer(), applicant()] {
        store.insert_user(user)?;
    }

    let id = ApplicationId::from(SAMPLE_APPLICATION_ID);
    store.insert_application(Application::new(
        id.clone(),
        UserId::from(APPLICANT_ID),
        sample_provider(),
        now,
    ))?;
    Ok(id)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(9, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{raw}': expected RFC 3339 or YYYY-MM-DD"))
}
