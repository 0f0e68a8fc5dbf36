//! Long-poll routes: the fallback channel transport.
//!
//! Same event semantics as the WebSocket, delivered over plain HTTP:
//! `POST /api/poll` opens a session, `GET` waits for queued events, `POST`
//! with a client event sends one, `DELETE` closes the session.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::routes::reports::ErrorResponse;
use crate::services::poll::PollError;
use crate::services::relay;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenResponse {
    pub connection_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitQuery {
    pub wait_ms: Option<u64>,
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        (StatusCode::NOT_FOUND, Json(ErrorResponse::from_error(&self))).into_response()
    }
}

/// `POST /api/poll`: open a session.
pub async fn open(State(state): State<AppState>) -> (StatusCode, Json<OpenResponse>) {
    let connection_id = state.polls.open();
    (StatusCode::CREATED, Json(OpenResponse { connection_id }))
}

/// `GET /api/poll/:id?waitMs=N`: wait for events, capped by config.
pub async fn recv(
    State(state): State<AppState>,
    Path(connection_id): Path<Uuid>,
    Query(query): Query<WaitQuery>,
) -> Result<Response, PollError> {
    let cap = state.config.poll_wait_max;
    let wait = query.wait_ms.map_or(cap, |ms| Duration::from_millis(ms).min(cap));
    let batch = state
        .polls
        .recv(connection_id, wait, state.config.poll_batch_max)
        .await?;
    Ok(Json(batch).into_response())
}

/// `POST /api/poll/:id`: send one client event.
pub async fn send(
    State(state): State<AppState>,
    Path(connection_id): Path<Uuid>,
    body: String,
) -> Result<Response, PollError> {
    state.polls.touch(connection_id)?;
    if let Some(rejection) = relay::handle_inbound_text(&state.dispatcher, connection_id, &body) {
        return Ok((StatusCode::BAD_REQUEST, Json(rejection)).into_response());
    }
    Ok(StatusCode::ACCEPTED.into_response())
}

/// `DELETE /api/poll/:id`: close the session.
pub async fn close(State(state): State<AppState>, Path(connection_id): Path<Uuid>) -> Result<StatusCode, PollError> {
    if state.polls.close(connection_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(PollError::UnknownSession(connection_id))
    }
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;
