//! Report routes: the store boundary viewers call before broadcasting.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use events::{CommentView, ErrorCode, ReportStatus, VoteView};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::routes::auth::MaybeViewer;
use crate::services::report::{self, ServiceError};
use crate::state::AppState;
use crate::store::StoreError;

#[derive(Deserialize)]
pub struct PostCommentBody {
    pub body: String,
}

#[derive(Deserialize)]
pub struct UpdateStatusBody {
    pub status: ReportStatus,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub report_id: String,
    pub status: ReportStatus,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearedResponse {
    pub cleared: u64,
}

/// Error body shared by every JSON route.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn from_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { code: err.error_code().to_owned(), message: err.to_string(), retryable: err.retryable() }
    }
}

pub(crate) fn service_error_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Unauthorized(_) | ServiceError::Store(StoreError::UnknownUser(_)) => StatusCode::UNAUTHORIZED,
        ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
        ServiceError::EmptyComment => StatusCode::BAD_REQUEST,
        ServiceError::Store(StoreError::ReportNotFound(_)) => StatusCode::NOT_FOUND,
        ServiceError::Store(StoreError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = service_error_status(&self);
        if status.is_server_error() {
            warn!(error = %self, code = self.error_code(), "report: request failed");
        }
        (status, Json(ErrorResponse::from_error(&self))).into_response()
    }
}

// =============================================================================
// COMMENTS
// =============================================================================

/// `GET /api/reports/:id/comments`: full history, oldest first.
pub async fn list_comments(
    State(state): State<AppState>,
    viewer: MaybeViewer,
    Path(report_id): Path<String>,
) -> Result<Json<Vec<CommentView>>, ServiceError> {
    let comments = report::list_comments(state.store.as_ref(), viewer.viewer(), &report_id).await?;
    Ok(Json(comments))
}

/// `POST /api/reports/:id/comments`: create a comment, returns it with its id.
pub async fn post_comment(
    State(state): State<AppState>,
    viewer: MaybeViewer,
    Path(report_id): Path<String>,
    Json(body): Json<PostCommentBody>,
) -> Result<(StatusCode, Json<CommentView>), ServiceError> {
    let comment = report::post_comment(state.store.as_ref(), viewer.viewer(), &report_id, &body.body).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// `DELETE /api/reports/:id/comments`: admin-only bulk clear.
pub async fn clear_comments(
    State(state): State<AppState>,
    viewer: MaybeViewer,
    Path(report_id): Path<String>,
) -> Result<Json<ClearedResponse>, ServiceError> {
    let cleared = report::clear_comments(state.store.as_ref(), viewer.viewer(), &report_id).await?;
    Ok(Json(ClearedResponse { cleared }))
}

// =============================================================================
// VOTES
// =============================================================================

/// `GET /api/reports/:id/vote`
pub async fn vote_status(
    State(state): State<AppState>,
    viewer: MaybeViewer,
    Path(report_id): Path<String>,
) -> Result<Json<VoteView>, ServiceError> {
    Ok(Json(report::vote_status(state.store.as_ref(), viewer.viewer(), &report_id).await?))
}

/// `POST /api/reports/:id/vote`: toggle and return the authoritative state.
pub async fn toggle_vote(
    State(state): State<AppState>,
    viewer: MaybeViewer,
    Path(report_id): Path<String>,
) -> Result<Json<VoteView>, ServiceError> {
    Ok(Json(report::toggle_vote(state.store.as_ref(), viewer.viewer(), &report_id).await?))
}

// =============================================================================
// STATUS
// =============================================================================

/// `GET /api/reports/:id/status`
pub async fn get_status(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> Result<Json<StatusResponse>, ServiceError> {
    let status = report::report_status(state.store.as_ref(), &report_id).await?;
    Ok(Json(StatusResponse { report_id, status }))
}

/// `PUT /api/reports/:id/status`: admin-only status change.
pub async fn update_status(
    State(state): State<AppState>,
    viewer: MaybeViewer,
    Path(report_id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<StatusResponse>, ServiceError> {
    let status = report::update_status(state.store.as_ref(), viewer.viewer(), &report_id, body.status).await?;
    Ok(Json(StatusResponse { report_id, status }))
}

#[cfg(test)]
#[path = "reports_test.rs"]
mod tests;
