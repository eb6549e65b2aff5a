use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{EvidenceDraft, SubmissionId, SubmissionStatus, TaskId, UserId};
use super::repository::{RepositoryError, Reviewer, SubmissionRepository, TaskCatalog};
use super::service::{DecisionOutcome, SubmissionService, SubmissionServiceError};
use super::verification::ScoreSignals;

/// Router builder exposing the submission lifecycle over HTTP.
pub fn submission_router<R, C>(service: Arc<SubmissionService<R, C>>) -> Router
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    Router::new()
        .route("/api/v1/tasks", get(task_list_handler::<R, C>))
        .route("/api/v1/tasks/:task_id", get(task_handler::<R, C>))
        .route("/api/v1/tasks/:task_id/start", post(start_handler::<R, C>))
        .route(
            "/api/v1/submissions/:submission_id",
            get(submission_handler::<R, C>),
        )
        .route(
            "/api/v1/submissions/:submission_id/evidence",
            post(evidence_handler::<R, C>),
        )
        .route(
            "/api/v1/submissions/:submission_id/decision",
            post(decision_handler::<R, C>),
        )
        .route(
            "/api/v1/submissions/:submission_id/verify",
            post(verify_handler::<R, C>),
        )
        .route(
            "/api/v1/submissions/:submission_id/settle",
            post(settle_handler::<R, C>),
        )
        .route(
            "/api/v1/submissions/:submission_id/verification",
            get(verification_handler::<R, C>),
        )
        .route("/api/v1/users/:user_id/ledger", get(ledger_handler::<R, C>))
        .route(
            "/api/v1/users/:user_id/submissions",
            get(list_handler::<R, C>),
        )
        .route(
            "/api/v1/users/:user_id/dashboard",
            get(dashboard_handler::<R, C>),
        )
        .with_state(service)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRequest {
    pub user_id: UserId,
    #[serde(flatten)]
    pub evidence: EvidenceDraft,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub fraud: Option<f64>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub reviewer: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    pub user_id: Option<String>,
    pub category: Option<String>,
}

/// Decision summary returned by the decision and verify endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionResponse {
    pub submission_id: SubmissionId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_awarded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_points: Option<u64>,
}

impl From<&DecisionOutcome> for DecisionResponse {
    fn from(outcome: &DecisionOutcome) -> Self {
        Self {
            submission_id: outcome.submission.id.clone(),
            status: outcome.status().label(),
            decision: outcome.decision.map(|decision| decision.label()),
            points_awarded: outcome.points_awarded(),
            total_points: outcome.total_points(),
        }
    }
}

/// Parses a comma-separated status filter, ignoring unknown entries.
pub fn parse_status_filter(raw: Option<&str>) -> Vec<SubmissionStatus> {
    raw.map(|raw| {
        raw.split(',')
            .filter_map(SubmissionStatus::parse)
            .collect()
    })
    .unwrap_or_default()
}

/// HTTP status for a service failure.
pub(crate) fn status_for(error: &SubmissionServiceError) -> StatusCode {
    match error {
        SubmissionServiceError::TaskNotFound(_)
        | SubmissionServiceError::NotFound(_)
        | SubmissionServiceError::VerificationNotFound(_) => StatusCode::NOT_FOUND,
        SubmissionServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
        SubmissionServiceError::TaskClosed { .. }
        | SubmissionServiceError::AlreadyStarted { .. }
        | SubmissionServiceError::Contention(_) => StatusCode::CONFLICT,
        SubmissionServiceError::WrongState { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SubmissionServiceError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SubmissionServiceError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: SubmissionServiceError) -> Response {
    let status = status_for(&error);
    let payload = json!({ "error": error.to_string() });
    (status, Json(payload)).into_response()
}

pub(crate) async fn task_list_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Query(query): Query<TaskQuery>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    let user_id = query.user_id.map(UserId);
    match service.available_tasks(user_id.as_ref(), query.category.as_deref()) {
        Ok(tasks) => (StatusCode::OK, Json(json!({ "tasks": tasks }))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn task_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(task_id): Path<String>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    match service.task(&TaskId(task_id)) {
        Ok(task) => (StatusCode::OK, Json(task)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn start_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(task_id): Path<String>,
    Json(request): Json<StartRequest>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    match service.start(&TaskId(task_id), &request.user_id) {
        Ok(submission) => {
            let payload = json!({
                "submission_id": submission.id,
                "status": submission.status.label(),
            });
            (StatusCode::CREATED, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn submission_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(submission_id): Path<String>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    match service.get(&SubmissionId(submission_id)) {
        Ok(submission) => (StatusCode::OK, Json(submission.status_view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn evidence_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(submission_id): Path<String>,
    Json(request): Json<EvidenceRequest>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    let EvidenceRequest { user_id, evidence } = request;
    match service.attach_evidence(&SubmissionId(submission_id), &user_id, evidence) {
        Ok(submission) => (StatusCode::ACCEPTED, Json(submission.status_view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn decision_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(submission_id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    let DecisionRequest {
        confidence,
        fraud,
        flags,
        reviewer,
    } = request;
    let reviewer = reviewer
        .map(Reviewer::Person)
        .unwrap_or(Reviewer::Automated);
    let signals = ScoreSignals::new(confidence, fraud, flags);

    match service.decide_at(
        &SubmissionId(submission_id),
        signals,
        reviewer,
        chrono::Utc::now(),
    ) {
        Ok(outcome) => (StatusCode::OK, Json(DecisionResponse::from(&outcome))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn verify_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(submission_id): Path<String>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    match service.verify(&SubmissionId(submission_id), None).await {
        Ok(outcome) => (StatusCode::OK, Json(DecisionResponse::from(&outcome))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn settle_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(submission_id): Path<String>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    match service.settle(&SubmissionId(submission_id)) {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn verification_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(submission_id): Path<String>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    match service.verification(&SubmissionId(submission_id)) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn ledger_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(user_id): Path<String>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    match service.ledger(&UserId(user_id)) {
        Ok(ledger) => (StatusCode::OK, Json(ledger)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn list_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(user_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    let statuses = parse_status_filter(query.status.as_deref());
    match service.list(&UserId(user_id), &statuses) {
        Ok(submissions) => {
            let views: Vec<_> = submissions
                .iter()
                .map(|submission| submission.status_view())
                .collect();
            (StatusCode::OK, Json(json!({ "submissions": views }))).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn dashboard_handler<R, C>(
    State(service): State<Arc<SubmissionService<R, C>>>,
    Path(user_id): Path<String>,
) -> Response
where
    R: SubmissionRepository + 'static,
    C: TaskCatalog + 'static,
{
    match service.dashboard(&UserId(user_id)) {
        Ok(dashboard) => (StatusCode::OK, Json(dashboard)).into_response(),
        Err(error) => error_response(error),
    }
}
