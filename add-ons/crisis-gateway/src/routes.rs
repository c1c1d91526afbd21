//! HTTP routes. JSON in and out, except the Twilio status callback which is a form post.

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use crisis_core::{CallId, CallStatus, CrisisError, SessionSnapshot, TurnOutcome};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// `CrisisError` as an HTTP response.
pub struct ApiError(CrisisError);

impl From<CrisisError> for ApiError {
    fn from(err: CrisisError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            CrisisError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            CrisisError::InvalidTransition { .. } | CrisisError::DuplicateCallAttempt(_) => {
                StatusCode::CONFLICT
            }
            CrisisError::CollaboratorUnavailable { .. } | CrisisError::Http(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Fields of a Twilio status callback we care about.
#[derive(Debug, Deserialize)]
pub struct StatusCallback {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/conversations/:id", get(get_session))
        .route("/api/v1/conversations/:id/messages", post(post_message))
        .route("/api/v1/conversations/:id/silence", post(post_silence))
        .route("/api/v1/conversations/:id/cancel", post(post_cancel))
        .route("/api/v1/telephony/status", post(telephony_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "app_name": &*state.app_name,
        "active_sessions": state.coordinator.active_sessions(),
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state
        .coordinator
        .snapshot(&id)
        .await
        .map(Json)
        .ok_or_else(|| CrisisError::SessionNotFound(id).into())
}

async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let outcome = state.coordinator.handle_input(&id, &req.text).await?;
    Ok(Json(outcome))
}

async fn post_silence(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let outcome = state.coordinator.record_silence(&id).await?;
    Ok(Json(outcome))
}

/// Body is optional: `{}` or no body at all cancels with a default reason.
async fn post_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "cancelled via API".to_string());
    let outcome = state.coordinator.cancel(&id, &reason).await?;
    Ok(Json(outcome))
}

async fn telephony_status(
    State(state): State<AppState>,
    Form(callback): Form<StatusCallback>,
) -> Result<StatusCode, (StatusCode, String)> {
    let status: CallStatus = callback
        .call_status
        .parse()
        .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?;
    let call_id = CallId::new(callback.call_sid);
    tracing::info!(call_id = %call_id, status = %status, "📞 Telephony status callback");
    if let Err(e) = state.coordinator.on_call_status(&call_id, status).await {
        tracing::warn!(call_id = %call_id, error = %e, "⚠️ Status callback not applied");
    }
    Ok(StatusCode::NO_CONTENT)
}
