use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use fastworkflow_runtime::StreamFormat;

use crate::app::AppState;
use crate::auth::JWT_ACCESS_TOKEN_EXPIRE_MINUTES;
use crate::http::{error_body, map_engine_error, ApiError};

#[derive(Deserialize)]
pub struct InitializeRequest {
    pub user_id: String,
    #[serde(default)]
    pub stream_format: Option<StreamFormat>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// POST /initialize — open or reopen a session and mint the token pair.
pub async fn initialize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitializeRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(error_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            "user_id cannot be empty",
            "INVALID_REQUEST",
        ));
    }

    let stream_format = req.stream_format.unwrap_or_default();
    state
        .engine
        .initialize_session(&req.user_id, stream_format)
        .map_err(map_engine_error)?;

    let access_token = state
        .jwt
        .create_access_token(&req.user_id, Some(&req.user_id), None)
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "AUTH_FAILED"))?;
    let refresh_token = state
        .jwt
        .create_refresh_token(&req.user_id, Some(&req.user_id))
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "AUTH_FAILED"))?;

    info!(user_id = %req.user_id, ?stream_format, "session opened");
    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "bearer".to_string(),
        expires_in: JWT_ACCESS_TOKEN_EXPIRE_MINUTES * 60,
    }))
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /refresh_token — exchange a refresh token for a fresh pair.
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let claims = state
        .jwt
        .verify(&req.refresh_token, "refresh")
        .map_err(|e| error_body(StatusCode::UNAUTHORIZED, e.to_string(), "AUTH_FAILED"))?;

    let access_token = state
        .jwt
        .create_access_token(&claims.sub, claims.uid.as_deref(), None)
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "AUTH_FAILED"))?;
    let refresh_token = state
        .jwt
        .create_refresh_token(&claims.sub, claims.uid.as_deref())
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "AUTH_FAILED"))?;

    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "bearer".to_string(),
        expires_in: JWT_ACCESS_TOKEN_EXPIRE_MINUTES * 60,
    }))
}
