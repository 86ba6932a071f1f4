pub mod admin;
pub mod conversations;
pub mod invoke;
pub mod probes;
pub mod session;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use fastworkflow_core::error::FastworkflowError;

use crate::app::AppState;
use crate::auth::{AuthError, Claims};

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn error_body(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// Map engine failures to HTTP responses.
pub fn map_engine_error(e: FastworkflowError) -> ApiError {
    let status = match &e {
        FastworkflowError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
        FastworkflowError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
        FastworkflowError::CommandNotFound { .. } => StatusCode::BAD_REQUEST,
        FastworkflowError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
        FastworkflowError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, e.to_string(), e.code())
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Authenticate a request: bearer access token, returning its claims.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let Some(token) = extract_bearer(headers) else {
        return Err(error_body(
            StatusCode::UNAUTHORIZED,
            "Missing 'Authorization: Bearer <token>' header",
            "AUTH_FAILED",
        ));
    };
    state.jwt.verify(token, "access").map_err(|e| match e {
        AuthError::WrongType { .. } => {
            error_body(StatusCode::FORBIDDEN, e.to_string(), "AUTH_FAILED")
        }
        _ => error_body(StatusCode::UNAUTHORIZED, e.to_string(), "AUTH_FAILED"),
    })
}
