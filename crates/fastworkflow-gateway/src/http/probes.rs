use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /probes/healthz — liveness; always 200 while the process is alive.
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /probes/readyz — readiness: the engine is built and the workflow
/// directory still resolves.
pub async fn readyz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let workflow_path_valid = state.engine.workflow_dir().is_dir();
    let ready = workflow_path_valid;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": ready,
            "fastworkflow_initialized": true,
            "workflow_path_valid": workflow_path_valid,
        })),
    )
}
