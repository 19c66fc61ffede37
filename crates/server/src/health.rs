use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tradebot_agent::engine::WorkflowEngine;

#[derive(Clone)]
pub struct HealthState {
    engine: Arc<WorkflowEngine>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub engine: HealthCheck,
    pub checked_at: String,
}

pub fn router(engine: Arc<WorkflowEngine>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { engine })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let engine = engine_check(&state.engine);
    let ready = engine.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "tradebot-server runtime initialized".to_string(),
        },
        engine,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn engine_check(engine: &WorkflowEngine) -> HealthCheck {
    let tool_count = engine.tool_count();
    if tool_count >= 2 {
        HealthCheck { status: "ready", detail: format!("{tool_count} tools registered") }
    } else {
        HealthCheck {
            status: "degraded",
            detail: format!("expected builtin tools, found {tool_count}"),
        }
    }
}
