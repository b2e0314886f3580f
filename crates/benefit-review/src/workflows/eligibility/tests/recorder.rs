use chrono::Duration;
use serde_json::{json, Value};

use super::common::*;
use crate::workflows::eligibility::audit::SERVICE_GENERATED_KEY;
use crate::workflows::eligibility::domain::{Metadata, SubjectRef};
use crate::workflows::eligibility::memory::InMemoryEligibilityStore;
use crate::workflows::eligibility::records::Event;
use crate::workflows::eligibility::repository::{EligibilityRepository, RepositoryError};

fn log_now(
    harness: &Harness<InMemoryEligibilityStore>,
    action: &str,
    subject: &SubjectRef,
    metadata: Metadata,
) -> Option<Event> {
    let recorder = harness.service.recorder();
    harness
        .store
        .transaction::<_, RepositoryError, _>(|tx| {
            recorder.log(tx, action, Some(&admin().id), subject, metadata, None)
        })
        .expect("log succeeds")
}

#[test]
fn repeats_inside_the_window_are_suppressed() {
    let harness = harness();
    let subject = SubjectRef::application(&app_id());

    let first = log_now(&harness, "documents_requested", &subject, Metadata::new());
    harness.clock.advance(Duration::seconds(3));
    let second = log_now(&harness, "documents_requested", &subject, Metadata::new());

    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(harness.events().len(), 1);

    harness.clock.advance(Duration::seconds(3));
    let third = log_now(&harness, "documents_requested", &subject, Metadata::new());
    assert!(third.is_some(), "six seconds after the first event the window has passed");
    assert_eq!(harness.events().len(), 2);
}

#[test]
fn window_edge_is_inclusive() {
    let harness = harness();
    let subject = SubjectRef::application(&app_id());

    log_now(&harness, "application_rejected", &subject, Metadata::new());
    harness.clock.advance(Duration::seconds(5));
    assert!(log_now(&harness, "application_rejected", &subject, Metadata::new()).is_none());
}

#[test]
fn different_subjects_and_actions_are_logged_independently() {
    let harness = harness();
    let application = SubjectRef::application(&app_id());
    let user = SubjectRef::user(&applicant().id);

    assert!(log_now(&harness, "documents_requested", &application, Metadata::new()).is_some());
    assert!(log_now(&harness, "documents_requested", &user, Metadata::new()).is_some());
    assert!(log_now(&harness, "application_rejected", &application, Metadata::new()).is_some());
    assert_eq!(harness.events().len(), 3);
}

#[test]
fn caller_metadata_wins_over_the_service_marker() {
    let harness = harness();
    let subject = SubjectRef::application(&app_id());
    let mut metadata = Metadata::new();
    metadata.insert(SERVICE_GENERATED_KEY.to_string(), json!(false));
    metadata.insert("reason".to_string(), json!("manual"));

    let event = log_now(&harness, "application_approved", &subject, metadata).expect("logged");
    assert_eq!(event.metadata.get(SERVICE_GENERATED_KEY), Some(&Value::Bool(false)));
    assert_eq!(event.metadata.get("reason"), Some(&json!("manual")));

    let plain = log_now(
        &harness,
        "application_rejected",
        &subject,
        Metadata::new(),
    )
    .expect("logged");
    assert_eq!(plain.metadata.get(SERVICE_GENERATED_KEY), Some(&Value::Bool(true)));
}

#[test]
fn explicit_timestamps_drive_the_window() {
    let harness = harness();
    let recorder = harness.service.recorder();
    let subject = SubjectRef::application(&app_id());

    let logged: Vec<Option<Event>> = [0, 3, 6]
        .into_iter()
        .map(|offset| {
            harness
                .store
                .transaction::<_, RepositoryError, _>(|tx| {
                    recorder.log(
                        tx,
                        "proof_approved",
                        None,
                        &subject,
                        Metadata::new(),
                        Some(start() + Duration::seconds(offset)),
                    )
                })
                .expect("log succeeds")
        })
        .collect();

    assert_eq!(
        logged.iter().map(Option::is_some).collect::<Vec<_>>(),
        vec![true, false, true]
    );
}

#[test]
fn committed_logging_uses_its_own_transaction() {
    let harness = harness();
    let recorder = harness.service.recorder();
    let subject = SubjectRef::application(&app_id());

    let event = recorder
        .log_committed(
            harness.store.as_ref(),
            "application_approved",
            Some(&admin().id),
            &subject,
            Metadata::new(),
        )
        .expect("log succeeds");

    assert!(event.is_some());
    assert_eq!(
        harness
            .store
            .events_for(&app_id())
            .expect("events load")
            .len(),
        1
    );
}
