use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use super::audit::{summarize, write_csv, AuditEntry, AuditLogAggregator, SYSTEM_ACTOR_NAME};
use super::domain::{
    ApplicationId, CertificationStatus, Metadata, NotificationId, SubmissionMethod, User, UserId,
};
use super::notifications::NotificationError;
use super::repository::{EligibilityRepository, RepositoryError};
use super::transitions::{
    CertificationInput, ProofReviewError, StatusTransitionService, TransitionOutcome,
};

/// Shared state for the eligibility endpoints.
pub struct EligibilityApi<R> {
    pub transitions: Arc<StatusTransitionService<R>>,
    pub timeline: Arc<AuditLogAggregator<R>>,
}

impl<R> Clone for EligibilityApi<R> {
    fn clone(&self) -> Self {
        Self {
            transitions: self.transitions.clone(),
            timeline: self.timeline.clone(),
        }
    }
}

impl<R> EligibilityApi<R>
where
    R: EligibilityRepository + 'static,
{
    pub fn new(
        transitions: Arc<StatusTransitionService<R>>,
        timeline: Arc<AuditLogAggregator<R>>,
    ) -> Self {
        Self {
            transitions,
            timeline,
        }
    }

    fn user(&self, id: &str) -> Result<User, Response> {
        match self.transitions.repository().find_user(&UserId::from(id)) {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(error_response(
                StatusCode::NOT_FOUND,
                format!("user {id} not found"),
            )),
            Err(error) => Err(repository_failure(error)),
        }
    }
}

type OverallTransition<R> =
    fn(&StatusTransitionService<R>, &ApplicationId, &User) -> TransitionOutcome;

/// Router builder exposing review transitions and audit views.
pub fn eligibility_router<R>(api: EligibilityApi<R>) -> Router
where
    R: EligibilityRepository + 'static,
{
    Router::new()
        .route(
            "/api/v1/eligibility/applications/:application_id/approve",
            post(approve_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/reject",
            post(reject_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/documents-request",
            post(documents_request_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/proofs/:proof_type/review",
            post(proof_review_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/certification/request",
            post(certification_request_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/certification/reject",
            post(certification_reject_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/certification/status",
            post(certification_status_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/certification/attach",
            post(certification_attach_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/certification/events",
            get(certification_events_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/certification/requests",
            get(certification_requests_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/timeline",
            get(timeline_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/timeline/raw",
            get(raw_timeline_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/applications/:application_id/timeline.csv",
            get(timeline_csv_handler::<R>),
        )
        .route(
            "/api/v1/eligibility/notifications/:notification_id/read",
            post(notification_read_handler::<R>),
        )
        .with_state(api)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorRequest {
    pub actor_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProofReviewRequest {
    pub admin_id: String,
    pub status: String,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificationRejectRequest {
    #[serde(default)]
    pub admin_id: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificationStatusRequest {
    pub admin_id: String,
    pub status: String,
    #[serde(default)]
    pub submission_method: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificationAttachRequest {
    pub admin_id: String,
    pub status: String,
    pub submission_method: String,
    pub document: Value,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Timeline entry with its display text.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineRow {
    pub entry: AuditEntry,
    pub actor_name: String,
    pub summary: String,
}

pub(crate) async fn approve_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<ActorRequest>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    overall_transition(&api, application_id, &request, StatusTransitionService::approve)
}

pub(crate) async fn reject_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<ActorRequest>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    overall_transition(&api, application_id, &request, StatusTransitionService::reject)
}

pub(crate) async fn documents_request_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<ActorRequest>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    overall_transition(
        &api,
        application_id,
        &request,
        StatusTransitionService::request_documents,
    )
}

fn overall_transition<R>(
    api: &EligibilityApi<R>,
    application_id: String,
    request: &ActorRequest,
    transition: OverallTransition<R>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let actor = match api.user(&request.actor_id) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let outcome = transition(api.transitions.as_ref(), &ApplicationId(application_id), &actor);
    outcome_response(outcome)
}

pub(crate) async fn proof_review_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path((application_id, proof_type)): Path<(String, String)>,
    axum::Json(request): axum::Json<ProofReviewRequest>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let admin = match api.user(&request.admin_id) {
        Ok(admin) => admin,
        Err(response) => return response,
    };
    let result = api.transitions.review_proof(
        &ApplicationId(application_id),
        &admin,
        &proof_type,
        &request.status,
        request.rejection_reason.as_deref(),
        request.notes.as_deref(),
    );

    match result {
        Ok(reviewed) => {
            let payload = json!({
                "review": reviewed.review,
                "application": reviewed.application,
                "outcome": reviewed.outcome,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(ProofReviewError::ApplicationNotFound) => error_response(
            StatusCode::NOT_FOUND,
            ProofReviewError::ApplicationNotFound.to_string(),
        ),
        Err(ProofReviewError::Repository(error)) => repository_failure(error),
        Err(validation) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, validation.to_string())
        }
    }
}

pub(crate) async fn certification_request_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<ActorRequest>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    overall_transition(
        &api,
        application_id,
        &request,
        StatusTransitionService::request_certification,
    )
}

pub(crate) async fn certification_reject_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<CertificationRejectRequest>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let admin = match request.admin_id.as_deref().map(|id| api.user(id)).transpose() {
        Ok(admin) => admin,
        Err(response) => return response,
    };
    let outcome = api.transitions.reject_certification(
        &ApplicationId(application_id),
        admin.as_ref(),
        &request.reason,
        request.notes.as_deref(),
    );
    outcome_response(outcome)
}

pub(crate) async fn certification_status_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<CertificationStatusRequest>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let admin = match api.user(&request.admin_id) {
        Ok(admin) => admin,
        Err(response) => return response,
    };
    let status = match request.status.parse::<CertificationStatus>() {
        Ok(status) => status,
        Err(message) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, message),
    };
    let submission_method = match request
        .submission_method
        .as_deref()
        .map(str::parse::<SubmissionMethod>)
        .transpose()
    {
        Ok(method) => method,
        Err(message) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, message),
    };

    let outcome = api.transitions.update_certification_status_only(
        &ApplicationId(application_id),
        status,
        &admin,
        submission_method,
        request.metadata,
    );
    outcome_response(outcome)
}

pub(crate) async fn certification_attach_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<CertificationAttachRequest>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let admin = match api.user(&request.admin_id) {
        Ok(admin) => admin,
        Err(response) => return response,
    };
    let status = match request.status.parse::<CertificationStatus>() {
        Ok(status) => status,
        Err(message) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, message),
    };
    let submission_method = match request.submission_method.parse::<SubmissionMethod>() {
        Ok(method) => method,
        Err(message) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, message),
    };

    let outcome = api.transitions.attach_certification(
        &ApplicationId(application_id),
        CertificationInput::Params(request.document),
        status,
        &admin,
        submission_method,
        request.metadata,
    );
    outcome_response(outcome)
}

pub(crate) async fn timeline_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let entries = api
        .timeline
        .build_deduplicated(&ApplicationId(application_id));
    timeline_response(&api, entries)
}

pub(crate) async fn raw_timeline_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let entries = api.timeline.build(&ApplicationId(application_id));
    timeline_response(&api, entries)
}

pub(crate) async fn certification_events_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let entries = api
        .timeline
        .certification_events(&ApplicationId(application_id));
    timeline_response(&api, entries)
}

pub(crate) async fn certification_requests_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    match api.timeline.request_events(&ApplicationId(application_id)) {
        Ok(requests) => (StatusCode::OK, axum::Json(requests)).into_response(),
        Err(error) => repository_failure(error),
    }
}

pub(crate) async fn timeline_csv_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let entries = match api
        .timeline
        .build_deduplicated(&ApplicationId(application_id))
    {
        Ok(entries) => entries,
        Err(error) => return repository_failure(error),
    };
    let actors = match api.timeline.actors(&entries) {
        Ok(actors) => actors,
        Err(error) => return repository_failure(error),
    };

    let mut body = Vec::new();
    match write_csv(&entries, &actors, &mut body) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => internal_failure("timeline export failed", &error),
    }
}

pub(crate) async fn notification_read_handler<R>(
    State(api): State<EligibilityApi<R>>,
    Path(notification_id): Path<String>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let notifications = api.transitions.notifications();
    match notifications.mark_as_read(&NotificationId(notification_id)) {
        Ok(notification) => {
            let summary = notifications.render(&notification).unwrap_or_default();
            let payload = json!({
                "notification": notification,
                "summary": summary,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(NotificationError::NotFound(id)) => {
            error_response(StatusCode::NOT_FOUND, format!("notification {id} not found"))
        }
        Err(other) => internal_failure("notification update failed", &other),
    }
}

fn timeline_response<R>(
    api: &EligibilityApi<R>,
    entries: Result<Vec<AuditEntry>, RepositoryError>,
) -> Response
where
    R: EligibilityRepository + 'static,
{
    let entries = match entries {
        Ok(entries) => entries,
        Err(error) => return repository_failure(error),
    };
    let actors = match api.timeline.actors(&entries) {
        Ok(actors) => actors,
        Err(error) => return repository_failure(error),
    };

    let rows: Vec<TimelineRow> = entries
        .into_iter()
        .map(|entry| {
            let actor = entry.actor_id().and_then(|id| actors.get(id));
            TimelineRow {
                actor_name: actor
                    .map(User::full_name)
                    .unwrap_or_else(|| SYSTEM_ACTOR_NAME.to_string()),
                summary: summarize(&entry, actor),
                entry,
            }
        })
        .collect();
    (StatusCode::OK, axum::Json(rows)).into_response()
}

fn outcome_response(outcome: TransitionOutcome) -> Response {
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, axum::Json(outcome)).into_response()
}

pub(crate) const INTERNAL_FAILURE_MESSAGE: &str =
    "Eligibility records are temporarily unavailable. Please try again.";

pub(crate) fn repository_failure(error: RepositoryError) -> Response {
    match error {
        RepositoryError::NotFound => error_response(StatusCode::NOT_FOUND, error.to_string()),
        other => internal_failure("repository request failed", &other),
    }
}

fn internal_failure(context: &'static str, error: &dyn std::fmt::Display) -> Response {
    error!(error = %error, "{context}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_FAILURE_MESSAGE)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let payload = json!({
        "error": message.into(),
    });
    (status, axum::Json(payload)).into_response()
}
