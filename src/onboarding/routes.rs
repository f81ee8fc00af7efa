//! REST adapter for the onboarding service.
//!
//! Handlers translate between HTTP and the service layer and nothing else:
//! authorization, validation, and every business rule live below. The
//! upstream gateway injects the caller's identity as a header; session
//! machinery stays external.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::directory::{Directory, User};
use crate::error::OnboardingError;
use crate::roles::Role;
use crate::store::Store;

use super::assignment::{AssignmentManager, CreateAssignmentRequest};
use super::catalog::TemplateCatalog;
use super::context::AssignmentContext;
use super::dashboard;
use super::engine::{ProgressionEngine, TransitionPayload};
use super::model::{AssignmentStatus, Event, ProgressStatus, TemplateDraft};
use super::ws;

/// Header the upstream gateway injects with the caller's email.
pub const ACTOR_HEADER: &str = "x-actor-email";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub directory: Arc<Directory>,
    pub catalog: Arc<TemplateCatalog>,
    pub assignments: Arc<AssignmentManager>,
    pub engine: Arc<ProgressionEngine>,
    pub events_tx: broadcast::Sender<Event>,
}

/// Build the Axum router with REST and WebSocket routes.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/templates", post(create_template).get(list_templates))
        .route("/api/templates/{id}", get(get_template))
        .route("/api/templates/{id}/active", post(set_template_active))
        .route(
            "/api/assignments",
            post(create_assignment).get(list_assignments),
        )
        .route("/api/assignments/{id}", delete(delete_assignment))
        .route("/api/assignments/{id}/dashboard", get(get_dashboard))
        .route("/api/assignments/{id}/status", post(change_assignment_status))
        .route("/api/assignments/{id}/events", get(list_events))
        .route("/api/progress/{id}/transition", post(transition_task))
        .route("/api/progress/{id}/blocked", get(get_blocked))
        .route(
            "/api/progress/{id}/evidence",
            post(record_evidence).get(list_evidence),
        )
        .route("/api/users", post(create_user))
        .route("/api/users/{id}/endorsement", post(set_endorsement))
        .route("/ws/assignments/{id}", get(ws::assignment_stream))
        .with_state(state)
}

// ── Error rendering ─────────────────────────────────────────────────────

/// Domain error wrapper so handlers can use `?`; the HTTP mapping lives in
/// one place.
pub(crate) struct ApiError(OnboardingError);

impl From<OnboardingError> for ApiError {
    fn from(err: OnboardingError) -> Self {
        Self(err)
    }
}

fn status_for(err: &OnboardingError) -> StatusCode {
    match err {
        OnboardingError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        OnboardingError::Forbidden { .. } => StatusCode::FORBIDDEN,
        OnboardingError::NotFound { .. } => StatusCode::NOT_FOUND,
        OnboardingError::DuplicateAssignment { .. }
        | OnboardingError::AssignmentNotActive { .. }
        | OnboardingError::ConcurrentUpdate { .. }
        | OnboardingError::TasksOutstanding { .. }
        | OnboardingError::InvalidStatusChange { .. } => StatusCode::CONFLICT,
        OnboardingError::Blocked { .. }
        | OnboardingError::EvidenceRequired { .. }
        | OnboardingError::SignOffRequired { .. }
        | OnboardingError::DirectorEndorsementRequired { .. }
        | OnboardingError::InvalidTemplate { .. }
        | OnboardingError::InvalidEmail { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OnboardingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Full context in the log, generic message outward.
            tracing::error!(error = %self.0, "Request failed");
            return (
                status,
                Json(json!({"code": "unexpected", "message": "Internal error"})),
            )
                .into_response();
        }

        let mut body = json!({"code": self.0.code(), "message": self.0.to_string()});
        match &self.0 {
            OnboardingError::Blocked {
                task_id,
                title,
                gate,
            } => {
                body["blocking_task_id"] = json!(task_id);
                body["blocking_task_title"] = json!(title);
                body["gate"] = json!(gate);
            }
            OnboardingError::SignOffRequired { role, .. } => {
                body["required_role"] = json!(role);
            }
            OnboardingError::DuplicateAssignment { assignment_id, .. } => {
                body["assignment_id"] = json!(assignment_id);
            }
            OnboardingError::TasksOutstanding { remaining, .. } => {
                body["remaining"] = json!(remaining);
            }
            OnboardingError::ConcurrentUpdate { id } => {
                body["id"] = json!(id);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

// ── Identity ────────────────────────────────────────────────────────────

/// Resolve the gateway identity header to a directory account.
pub(crate) async fn actor(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let email = headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if email.is_empty() {
        return Err(OnboardingError::Unauthorized {
            email: "anonymous".into(),
        }
        .into());
    }
    Ok(state.directory.resolve_actor(email).await?)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "medictrack"
    }))
}

// ── Templates ───────────────────────────────────────────────────────────

async fn create_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<TemplateDraft>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&state, &headers).await?;
    let template = state.catalog.create_template(&actor, draft).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn list_templates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    actor(&state, &headers).await?;
    Ok(Json(state.catalog.list_templates().await?))
}

async fn get_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    actor(&state, &headers).await?;
    Ok(Json(state.catalog.get_template(id).await?))
}

#[derive(Deserialize)]
struct SetActiveRequest {
    active: bool,
}

async fn set_template_active(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<SetActiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&state, &headers).await?;
    state.catalog.set_active(&actor, id, body.active).await?;
    Ok(Json(json!({"template_id": id, "active": body.active})))
}

// ── Assignments ─────────────────────────────────────────────────────────

async fn create_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateAssignmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&state, &headers).await?;
    let assignment = state.assignments.create(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn list_assignments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    actor(&state, &headers).await?;
    Ok(Json(state.assignments.list().await?))
}

async fn get_dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    actor(&state, &headers).await?;
    let ctx = AssignmentContext::load(state.store.as_ref(), id).await?;
    Ok(Json(dashboard::assemble(&ctx)))
}

#[derive(Deserialize)]
struct StatusChangeRequest {
    status: AssignmentStatus,
}

async fn change_assignment_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusChangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&state, &headers).await?;
    let assignment = state
        .assignments
        .update_status(&actor, id, body.status)
        .await?;
    Ok(Json(assignment))
}

async fn delete_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&state, &headers).await?;
    state.assignments.delete(&actor, id).await?;
    Ok(Json(json!({"status": "deleted"})))
}

async fn list_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    actor(&state, &headers).await?;
    Ok(Json(state.assignments.events(id).await?))
}

// ── Task progression ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TransitionRequest {
    status: ProgressStatus,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    time_spent_minutes: Option<u32>,
}

async fn transition_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<TransitionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&state, &headers).await?;
    let payload = TransitionPayload {
        notes: body.notes,
        time_spent_minutes: body.time_spent_minutes,
    };
    let outcome = state
        .engine
        .request_transition(id, body.status, &actor, payload)
        .await?;
    Ok(Json(outcome))
}

async fn get_blocked(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    actor(&state, &headers).await?;
    let blocker = state.engine.compute_blocked(id).await?;
    Ok(Json(json!({"blocked": blocker.is_some(), "blocker": blocker})))
}

#[derive(Deserialize)]
struct EvidenceRequest {
    file_name: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

async fn record_evidence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<EvidenceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&state, &headers).await?;
    let evidence = state
        .engine
        .record_evidence(id, &actor, &body.file_name, body.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(evidence)))
}

async fn list_evidence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    actor(&state, &headers).await?;
    Ok(Json(state.engine.list_evidence(id).await?))
}

// ── Directory ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateUserRequest {
    email: String,
    name: String,
    role: Role,
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&state, &headers).await?;
    let user = state
        .directory
        .create_user(&actor, &body.email, &body.name, body.role)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
struct EndorsementRequest {
    active: bool,
}

async fn set_endorsement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<EndorsementRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&state, &headers).await?;
    state
        .directory
        .set_director_endorsement(&actor, id, body.active)
        .await?;
    Ok(Json(json!({"user_id": id, "active": body.active})))
}
