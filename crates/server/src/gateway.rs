use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tradebot_agent::engine::{EngineError, InvokeOutcome, WorkflowEngine};
use tracing::warn;
use uuid::Uuid;

use crate::health;

#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<WorkflowEngine>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub thread_id: String,
    pub decision: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ChatResponse {
    pub status: &'static str,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspension_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type GatewayError = (StatusCode, Json<ErrorBody>);

impl ChatResponse {
    fn from_outcome(thread_id: String, outcome: InvokeOutcome) -> Self {
        match outcome {
            InvokeOutcome::Completed { response } => Self {
                status: "completed",
                thread_id,
                response: Some(response),
                approval_prompt: None,
                suspension_id: None,
            },
            InvokeOutcome::ApprovalRequired { prompt, suspension_id } => Self {
                status: "approval_required",
                thread_id,
                response: None,
                approval_prompt: Some(prompt),
                suspension_id: Some(suspension_id),
            },
        }
    }
}

pub fn router(engine: Arc<WorkflowEngine>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/approve", post(approve))
        .with_state(GatewayState { engine: engine.clone() })
        .merge(health::router(engine))
}

pub async fn chat(
    State(state): State<GatewayState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, GatewayError> {
    let thread_id = request.thread_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let outcome = state
        .engine
        .invoke(&thread_id, &request.message)
        .await
        .map_err(|error| into_gateway_error(&thread_id, error))?;
    Ok(Json(ChatResponse::from_outcome(thread_id, outcome)))
}

pub async fn approve(
    State(state): State<GatewayState>,
    Json(request): Json<ApprovalRequest>,
) -> Result<Json<ChatResponse>, GatewayError> {
    let outcome = state
        .engine
        .resume(&request.thread_id, &request.decision)
        .await
        .map_err(|error| into_gateway_error(&request.thread_id, error))?;
    Ok(Json(ChatResponse::from_outcome(request.thread_id, outcome)))
}

/// Contract violations get 409, bad tool input 422, upstream model trouble
/// 502. The gateway never retries on the caller's behalf.
fn into_gateway_error(thread_id: &str, error: EngineError) -> GatewayError {
    let status = match &error {
        EngineError::NoPendingSuspension { .. } | EngineError::SuspensionPending { .. } => {
            StatusCode::CONFLICT
        }
        EngineError::Tool(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Model(_) => StatusCode::BAD_GATEWAY,
    };
    warn!(
        event_name = "gateway.request_failed",
        thread_id,
        status = status.as_u16(),
        error = %error,
        "request rejected"
    );
    (status, Json(ErrorBody { error: error.to_string() }))
}
