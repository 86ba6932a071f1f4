use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use fastworkflow_runtime::Engine;

use crate::auth::JwtManager;
use crate::http;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub engine: Arc<Engine>,
    pub jwt: JwtManager,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, jwt: JwtManager) -> Self {
        Self { engine, jwt }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/initialize", post(http::session::initialize))
        .route("/refresh_token", post(http::session::refresh_token))
        .route("/invoke_agent", post(http::invoke::invoke_agent))
        .route(
            "/invoke_agent_stream",
            post(http::invoke::invoke_agent_stream),
        )
        .route("/invoke_assistant", post(http::invoke::invoke_assistant))
        .route("/perform_action", post(http::invoke::perform_action))
        .route(
            "/new_conversation",
            post(http::conversations::new_conversation),
        )
        .route("/conversations", get(http::conversations::list_conversations))
        .route("/post_feedback", post(http::conversations::post_feedback))
        .route(
            "/activate_conversation",
            post(http::conversations::activate_conversation),
        )
        .route(
            "/admin/dump_all_conversations",
            post(http::admin::dump_all_conversations),
        )
        .route(
            "/admin/generate_mcp_token",
            post(http::admin::generate_mcp_token),
        )
        .route("/probes/healthz", get(http::probes::healthz))
        .route("/probes/readyz", get(http::probes::readyz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
