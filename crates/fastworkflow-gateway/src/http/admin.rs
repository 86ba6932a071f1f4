use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::app::AppState;
use crate::http::{authenticate, map_engine_error, ApiError};

#[derive(Deserialize)]
pub struct DumpRequest {
    pub output_folder: PathBuf,
}

/// POST /admin/dump_all_conversations — JSONL export of every user's
/// persisted conversations.
pub async fn dump_all_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DumpRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    info!(admin = %claims.user_id(), folder = %req.output_folder.display(), "dumping conversations");
    let path = state
        .engine
        .dump_all_conversations(&req.output_folder)
        .map_err(map_engine_error)?;
    Ok(Json(json!({ "output_file": path })))
}

#[derive(Deserialize)]
pub struct McpTokenRequest {
    pub channel_id: String,
    /// Token lifetime; MCP clients use long-lived pre-configured tokens.
    #[serde(default = "default_expires_days")]
    pub expires_days: i64,
}

fn default_expires_days() -> i64 {
    365
}

/// POST /admin/generate_mcp_token — long-lived access token for MCP
/// clients.
pub async fn generate_mcp_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<McpTokenRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let _claims = authenticate(&state, &headers)?;
    let token = state
        .jwt
        .create_access_token(&req.channel_id, None, Some(req.expires_days))
        .map_err(|e| {
            crate::http::error_body(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "AUTH_FAILED",
            )
        })?;
    info!(channel_id = %req.channel_id, expires_days = req.expires_days, "MCP token generated");
    Ok(Json(json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_days": req.expires_days,
    })))
}
