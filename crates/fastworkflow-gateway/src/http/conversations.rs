use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use fastworkflow_runtime::ConversationRef;

use crate::app::AppState;
use crate::http::{authenticate, error_body, map_engine_error, ApiError};

/// POST /new_conversation — rotate: flush the in-memory turns under a
/// generated topic/summary and reserve the next conversation id.
pub async fn new_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let conversation_id = state
        .engine
        .new_conversation(claims.user_id())
        .await
        .map_err(map_engine_error)?;
    Ok(Json(json!({ "conversation_id": conversation_id })))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// GET /conversations?limit=N — summaries ordered by updated-at desc.
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let conversations = state
        .engine
        .list_conversations(claims.user_id(), query.limit)
        .map_err(map_engine_error)?;
    Ok(Json(json!({ "conversations": conversations })))
}

#[derive(Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub binary_or_numeric_score: Option<serde_json::Value>,
    #[serde(default)]
    pub nl_feedback: Option<String>,
}

/// POST /post_feedback — overwrite the last turn's feedback. At least one
/// of the two fields is required.
pub async fn post_feedback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    if req.binary_or_numeric_score.is_none() && req.nl_feedback.is_none() {
        return Err(error_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            "provide binary_or_numeric_score and/or nl_feedback",
            "INVALID_REQUEST",
        ));
    }

    let mut feedback = serde_json::Map::new();
    if let Some(score) = req.binary_or_numeric_score {
        feedback.insert("binary_or_numeric_score".to_string(), score);
    }
    if let Some(text) = req.nl_feedback {
        feedback.insert("nl_feedback".to_string(), json!(text));
    }

    state
        .engine
        .post_feedback(claims.user_id(), serde_json::Value::Object(feedback))
        .await
        .map_err(map_engine_error)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct ActivateRequest {
    #[serde(default)]
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub topic: Option<String>,
}

/// POST /activate_conversation — `{conversation_id | topic}`.
pub async fn activate_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ActivateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let conversation = match (req.conversation_id, req.topic) {
        (Some(id), _) => ConversationRef::Id(id),
        (None, Some(topic)) => ConversationRef::Topic(topic),
        (None, None) => {
            return Err(error_body(
                StatusCode::UNPROCESSABLE_ENTITY,
                "provide conversation_id or topic",
                "INVALID_REQUEST",
            ));
        }
    };
    let conversation_id = state
        .engine
        .activate_conversation(claims.user_id(), conversation)
        .await
        .map_err(map_engine_error)?;
    Ok(Json(json!({ "conversation_id": conversation_id })))
}
