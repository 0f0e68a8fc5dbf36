//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the two channel transports (WebSocket and long-poll), the report
//! store boundary, and the health check under a single Axum router.

pub mod auth;
pub mod poll;
pub mod reports;
pub mod ws;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/poll", post(poll::open))
        .route(
            "/api/poll/{connection_id}",
            get(poll::recv).post(poll::send).delete(poll::close),
        )
        .route(
            "/api/reports/{id}/comments",
            get(reports::list_comments)
                .post(reports::post_comment)
                .delete(reports::clear_comments),
        )
        .route("/api/reports/{id}/vote", get(reports::vote_status).post(reports::toggle_vote))
        .route("/api/reports/{id}/status", get(reports::get_status).put(reports::update_status))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub ok: bool,
    pub connections: usize,
    pub rooms: usize,
}

async fn healthz(State(state): State<AppState>) -> Response {
    match state.dispatcher.stats().await {
        Some(stats) => Json(Health { ok: true, connections: stats.connections, rooms: stats.rooms }).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Health { ok: false, connections: 0, rooms: 0 }),
        )
            .into_response(),
    }
}
