use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::workflows::eligibility::domain::MedicalProvider;
use crate::workflows::eligibility::gateways::ObjectStorage;
use crate::workflows::eligibility::memory::InMemoryEligibilityStore;
use crate::workflows::eligibility::repository::RepositoryError;
use crate::workflows::eligibility::router::{
    self, ActorRequest, EligibilityApi, INTERNAL_FAILURE_MESSAGE,
};

const BASE: &str = "/api/v1/eligibility/applications/app-1";

async fn post_json(router: Router, uri: &str, body: Value) -> Response {
    router
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(router: Router, uri: &str) -> Response {
    router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn approve_handler_returns_the_outcome() {
    let harness = harness();
    let api = EligibilityApi::new(harness.service.clone(), harness.aggregator.clone());

    let response = router::approve_handler::<InMemoryEligibilityStore>(
        State(api),
        Path(APP_ID.to_string()),
        axum::Json(ActorRequest {
            actor_id: admin().id.0,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["success"], json!(true));
    assert!(body["side_effects"]
        .as_array()
        .expect("side effects listed")
        .iter()
        .any(|effect| effect["name"] == "voucher"));
}

#[tokio::test]
async fn unknown_actor_is_not_found() {
    let harness = harness();

    let response = post_json(
        harness.router(),
        &format!("{BASE}/approve"),
        json!({ "actor_id": "ghost" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json_body(response).await;
    assert_eq!(body["error"], json!("user ghost not found"));
}

#[tokio::test]
async fn invalid_proof_review_is_unprocessable() {
    let harness = harness();

    let response = post_json(
        harness.router(),
        &format!("{BASE}/proofs/income/review"),
        json!({ "admin_id": "admin-1", "status": "pending" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json_body(response).await;
    assert_eq!(body["error"], json!("Invalid proof review status: pending"));
}

#[tokio::test]
async fn proof_review_on_missing_application_is_not_found() {
    let harness = harness();

    let response = post_json(
        harness.router(),
        "/api/v1/eligibility/applications/missing/proofs/income/review",
        json!({ "admin_id": "admin-1", "status": "approved" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_transition_reports_the_user_message() {
    let harness = harness();
    harness
        .store
        .insert_application(application_with(
            "app-2",
            MedicalProvider {
                email: None,
                ..provider()
            },
        ))
        .expect("application seeded");

    let response = post_json(
        harness.router(),
        "/api/v1/eligibility/applications/app-2/certification/request",
        json!({ "actor_id": "admin-1" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json_body(response).await;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("Medical provider email is required"));
}

#[tokio::test]
async fn attach_route_accepts_a_stored_blob() {
    let harness = harness();
    assert!(harness.service.request_certification(&app_id(), &admin()).success);
    let stored = harness.storage.store_upload(&upload()).expect("blob stored");

    let response = post_json(
        harness.router(),
        &format!("{BASE}/certification/attach"),
        json!({
            "admin_id": "admin-1",
            "status": "received",
            "submission_method": "fax",
            "document": {
                "medical_certification": {
                    "blob_key": stored.blob_key,
                    "filename": "certification.pdf"
                }
            }
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        harness.application().medical_certification,
        Some(stored)
    );
}

#[tokio::test]
async fn status_route_rejects_unknown_statuses() {
    let harness = harness();

    let response = post_json(
        harness.router(),
        &format!("{BASE}/certification/status"),
        json!({ "admin_id": "admin-1", "status": "lost" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json_body(response).await;
    assert_eq!(body["error"], json!("Invalid certification status: lost"));
}

#[tokio::test]
async fn timeline_route_returns_deduplicated_rows() {
    let harness = harness();
    assert!(harness.service.approve(&app_id(), &admin()).success);

    let raw = read_json_body(get(harness.router(), &format!("{BASE}/timeline/raw")).await).await;
    let response = get(harness.router(), &format!("{BASE}/timeline")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let rows = read_json_body(response).await;
    let rows = rows.as_array().expect("rows");
    assert_eq!(raw.as_array().map(Vec::len), Some(2));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["entry"]["kind"], json!("event"));
    assert_eq!(rows[0]["actor_name"], json!("Dana Whitfield"));
}

#[tokio::test]
async fn certification_requests_route_lists_requests() {
    let harness = harness();
    assert!(harness.service.request_certification(&app_id(), &admin()).success);

    let response = get(harness.router(), &format!("{BASE}/certification/requests")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["actor_name"], json!("Dana Whitfield"));
}

#[tokio::test]
async fn csv_export_sets_the_content_type() {
    let harness = harness();
    assert!(harness.service.request_documents(&app_id(), &admin()).success);

    let response = get(harness.router(), &format!("{BASE}/timeline.csv")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("timestamp,kind,action,actor,summary"));
    assert!(lines.next().is_some_and(|row| row.contains("Dana Whitfield")));
}

#[tokio::test]
async fn reading_a_notification_marks_it_read() {
    let harness = harness();
    assert!(harness.service.reject(&app_id(), &admin()).success);
    let notification = harness
        .notifications()
        .into_iter()
        .next()
        .expect("notification stored");

    let response = post_json(
        harness.router(),
        &format!("/api/v1/eligibility/notifications/{}/read", notification.id),
        json!({}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert!(!body["notification"]["read_at"].is_null());
    assert_eq!(
        body["summary"],
        json!("Application #app-1 rejected by Dana Whitfield.")
    );

    let missing = post_json(
        harness.router(),
        "/api/v1/eligibility/notifications/ntf-missing/read",
        json!({}),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn storage_failures_hide_the_raw_error() {
    let response = router::repository_failure(RepositoryError::Unavailable(
        "store mutex poisoned".to_string(),
    ));

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_json_body(response).await;
    assert_eq!(body["error"], json!(INTERNAL_FAILURE_MESSAGE));
    assert!(!body.to_string().contains("mutex"));
}
