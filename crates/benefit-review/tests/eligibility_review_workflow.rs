use std::sync::Arc;

use benefit_review::clock::ManualClock;
use benefit_review::config::ReviewPolicy;
use benefit_review::workflows::eligibility::audit::write_csv;
use benefit_review::workflows::eligibility::{
    Application, ApplicationId, ApplicationStatus, AuditEntry, AuditLogAggregator,
    CertificationInput, CertificationStatus, DeliveryStatus, EligibilityRepository, Gateways,
    InMemoryEligibilityStore, InMemoryObjectStorage, InMemoryTaskQueue, MedicalProvider,
    NotificationMode, ObjectStorage, RecordingMailer, SequentialVoucherIssuer,
    StatusTransitionService, SubmissionMethod, TemplateGroup, UploadedFile, User, UserId,
    UserKind,
};
use chrono::{Duration, TimeZone, Utc};

struct Pipeline {
    service: StatusTransitionService<InMemoryEligibilityStore>,
    timeline: AuditLogAggregator<InMemoryEligibilityStore>,
    store: Arc<InMemoryEligibilityStore>,
    clock: Arc<ManualClock>,
    mailer: Arc<RecordingMailer>,
    storage: Arc<InMemoryObjectStorage>,
    queue: Arc<InMemoryTaskQueue>,
}

fn reviewer() -> User {
    User {
        id: UserId::from("admin-7"),
        kind: UserKind::Administrator,
        first_name: "Priya".to_string(),
        last_name: "Natarajan".to_string(),
        email: "priya.natarajan@example.org".to_string(),
    }
}

fn applicant() -> User {
    User {
        id: UserId::from("applicant-42"),
        kind: UserKind::Applicant,
        first_name: "Sam".to_string(),
        last_name: "Okafor".to_string(),
        email: "sam.okafor@example.org".to_string(),
    }
}

fn application_id() -> ApplicationId {
    ApplicationId::from("app-42")
}

fn pipeline() -> Pipeline {
    let start = Utc
        .with_ymd_and_hms(2025, 5, 6, 9, 0, 0)
        .single()
        .expect("valid start");
    let clock = Arc::new(ManualClock::starting_at(start));
    let store = Arc::new(InMemoryEligibilityStore::default());
    let system = User {
        id: UserId::from("system"),
        kind: UserKind::System,
        first_name: "System".to_string(),
        last_name: String::new(),
        email: "no-reply@example.org".to_string(),
    };
    for user in [reviewer(), applicant(), system.clone()] {
        store.insert_user(user).expect("user seeded");
    }
    store
        .insert_application(Application::new(
            application_id(),
            applicant().id,
            MedicalProvider {
                name: "Dr. Imani Brooks".to_string(),
                email: Some("brooks@clinic.example.org".to_string()),
                fax: None,
                phone: None,
            },
            start,
        ))
        .expect("application seeded");

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

    Pipeline {
        service: StatusTransitionService::new(
            store.clone(),
            gateways,
            clock.clone(),
            policy.clone(),
            system,
            NotificationMode::Strict,
        ),
        timeline: AuditLogAggregator::new(store.clone(), &policy),
        store,
        clock,
        mailer,
        storage,
        queue,
    }
}

#[test]
fn full_review_ends_in_automatic_approval() {
    let pipeline = pipeline();
    let id = application_id();
    let admin = reviewer();

    pipeline
        .service
        .review_proof(&id, &admin, "income", "rejected", Some("Pay stub is cut off"), None)
        .expect("income rejected");
    pipeline.clock.advance(Duration::days(2));
    pipeline
        .service
        .review_proof(&id, &admin, "income", "approved", None, None)
        .expect("income approved");
    pipeline
        .service
        .review_proof(&id, &admin, "residency", "approved", None, None)
        .expect("residency approved");

    pipeline.clock.advance(Duration::minutes(10));
    let requested = pipeline.service.request_certification(&id, &admin);
    assert!(requested.success, "{requested:?}");

    for task in pipeline.queue.drain() {
        pipeline
            .service
            .notifications()
            .perform_task(&task)
            .expect("provider email sent");
    }
    assert!(pipeline
        .mailer
        .sent()
        .iter()
        .any(|mail| mail.template_group == TemplateGroup::MedicalProvider
            && mail.recipient == "brooks@clinic.example.org"));

    pipeline.clock.advance(Duration::days(3));
    let stored = pipeline
        .storage
        .store_upload(&UploadedFile {
            filename: "brooks-certification.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: b"%PDF-1.4".to_vec(),
        })
        .expect("upload stored");
    let received = pipeline.service.attach_certification(
        &id,
        CertificationInput::SignedId(InMemoryObjectStorage::signed_id_for(&stored)),
        CertificationStatus::Received,
        &admin,
        SubmissionMethod::Fax,
        Default::default(),
    );
    assert!(received.success, "{received:?}");

    pipeline.clock.advance(Duration::hours(1));
    let approved = pipeline.service.update_certification_status_only(
        &id,
        CertificationStatus::Approved,
        &admin,
        None,
        Default::default(),
    );
    assert!(approved.success, "{approved:?}");
    assert!(!approved.is_partial(), "{approved:?}");

    let application = pipeline
        .store
        .find_application(&id)
        .expect("lookup succeeds")
        .expect("application exists");
    assert_eq!(application.status, ApplicationStatus::Approved);
    assert_eq!(application.medical_certification_status, CertificationStatus::Approved);
    assert_eq!(application.medical_certification, Some(stored));

    assert!(pipeline
        .store
        .all_notifications()
        .expect("notifications load")
        .iter()
        .all(|notification| notification.delivery_status != DeliveryStatus::Error));
}

#[test]
fn timeline_is_deduplicated_and_exportable() {
    let pipeline = pipeline();
    let id = application_id();
    let admin = reviewer();

    pipeline
        .service
        .review_proof(&id, &admin, "residency", "rejected", Some("Lease expired"), None)
        .expect("residency rejected");
    pipeline.clock.advance(Duration::minutes(3));
    assert!(pipeline.service.request_certification(&id, &admin).success);
    pipeline.clock.advance(Duration::seconds(20));
    assert!(pipeline.service.request_certification(&id, &admin).success);

    let raw = pipeline.timeline.build(&id).expect("raw timeline");
    let timeline = pipeline
        .timeline
        .build_deduplicated(&id)
        .expect("deduplicated timeline");
    assert!(timeline.len() < raw.len());
    assert!(timeline
        .windows(2)
        .all(|pair| pair[0].timestamp() >= pair[1].timestamp()));
    assert!(timeline
        .iter()
        .any(|entry| matches!(entry, AuditEntry::ProofReview(_))));

    let requests = pipeline.timeline.request_events(&id).expect("requests");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].actor_name, "Priya Natarajan");

    let actors = pipeline.timeline.actors(&timeline).expect("actors load");
    let mut csv = Vec::new();
    write_csv(&timeline, &actors, &mut csv).expect("csv written");
    let csv = String::from_utf8(csv).expect("utf-8");
    assert_eq!(csv.lines().count(), timeline.len() + 1);
    assert!(csv.contains("Priya Natarajan"));
}
