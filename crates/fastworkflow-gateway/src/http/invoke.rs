use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use fastworkflow_core::error::FastworkflowError;
use fastworkflow_core::types::Action;
use fastworkflow_runtime::InvocationResult;

use crate::app::AppState;
use crate::http::{authenticate, map_engine_error, ApiError};
use crate::stream;

const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

#[derive(Deserialize)]
pub struct InvokeRequest {
    pub user_query: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// A session that vanished yields an empty response; the caller should call
/// `/initialize` again.
fn empty_result() -> Json<serde_json::Value> {
    Json(json!({
        "command_output": { "command_responses": [] },
        "traces": [],
    }))
}

fn result_json(result: InvocationResult) -> Json<serde_json::Value> {
    Json(json!({
        "command_output": result.command_output,
        "traces": result.traces,
    }))
}

/// POST /invoke_agent — agentic turn with tool-use and the clarification
/// loop; returns the final output plus collected traces.
pub async fn invoke_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<InvokeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let timeout = req.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    match state
        .engine
        .invoke_agent(claims.user_id(), &req.user_query, timeout, None)
        .await
    {
        Ok(result) => Ok(result_json(result)),
        Err(FastworkflowError::SessionNotFound { .. }) => Ok(empty_result()),
        Err(e) => Err(map_engine_error(e)),
    }
}

/// POST /invoke_agent_stream — same as invoke_agent, streaming trace events
/// live in the session's negotiated format (NDJSON or SSE), terminated by a
/// `result` frame.
pub async fn invoke_agent_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<InvokeRequest>,
) -> Result<Response, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let user_id = claims.user_id().to_string();
    let format = match state.engine.session(&user_id) {
        Ok(runtime) => runtime.stream_format(),
        Err(_) => Default::default(),
    };
    let timeout = req.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

    let (live_tx, mut live_rx) = mpsc::channel(256);
    let engine = state.engine.clone();
    let query = req.user_query.clone();
    let mut task = tokio::spawn(async move {
        engine
            .invoke_agent(&user_id, &query, timeout, Some(live_tx))
            .await
    });

    let body_stream = async_stream::stream! {
        // Forward live events until the invocation drops its sender, then
        // drain stragglers and emit the terminal `result` frame.
        while let Some(event) = live_rx.recv().await {
            yield Ok::<_, std::convert::Infallible>(
                axum::body::Bytes::from(stream::format_trace(format, &event)),
            );
        }
        let result = (&mut task).await;
        while let Ok(event) = live_rx.try_recv() {
            yield Ok(axum::body::Bytes::from(stream::format_trace(format, &event)));
        }
        let final_value = match result {
            Ok(Ok(result)) => json!({
                "command_output": result.command_output,
                "traces": result.traces,
            }),
            Ok(Err(e)) => {
                warn!(error = %e, "streaming invocation failed");
                json!({ "error": e.to_string(), "code": e.code() })
            }
            Err(e) => json!({ "error": e.to_string(), "code": "INTERNAL_ERROR" }),
        };
        yield Ok(axum::body::Bytes::from(stream::format_result(format, &final_value)));
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, stream::content_type(format))
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .map_err(|e| {
            crate::http::error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "INTERNAL_ERROR",
            )
        })
}

/// POST /invoke_assistant — deterministic (no agent) turn.
pub async fn invoke_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<InvokeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let timeout = req.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    match state
        .engine
        .invoke_assistant(claims.user_id(), &req.user_query, timeout)
        .await
    {
        Ok(result) => Ok(result_json(result)),
        Err(FastworkflowError::SessionNotFound { .. }) => Ok(empty_result()),
        Err(e) => Err(map_engine_error(e)),
    }
}

#[derive(Deserialize)]
pub struct PerformActionRequest {
    pub action: Action,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// POST /perform_action — bypass NLU with a structured action.
pub async fn perform_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PerformActionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let timeout = req.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    match state
        .engine
        .perform_action(claims.user_id(), &req.action, timeout)
        .await
    {
        Ok(result) => Ok(result_json(result)),
        Err(FastworkflowError::SessionNotFound { .. }) => Ok(empty_result()),
        Err(e) => Err(map_engine_error(e)),
    }
}
