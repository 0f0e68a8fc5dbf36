//! Report service: comments, votes, and status behind the policy check.
//!
//! DESIGN
//! ======
//! These are the store calls a viewer makes before it broadcasts anything.
//! Each operation runs `authorize` first, so a rejected action never reaches
//! the store and the caller never gets a confirmed value to broadcast.

use events::{CommentView, ErrorCode, ReportStatus, VoteView};
use tracing::info;

use super::policy::{Action, can};
use crate::store::{Store, StoreError, Viewer};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("sign-in required for {}", .0.as_str())]
    Unauthorized(Action),
    #[error("{} requires an admin", .0.as_str())]
    Forbidden(Action),
    #[error("comment body is empty")]
    EmptyComment,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for ServiceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "E_UNAUTHORIZED",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::EmptyComment => "E_EMPTY_COMMENT",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }
}

fn authorize(viewer: Option<&Viewer>, action: Action, report_id: &str) -> Result<(), ServiceError> {
    if can(viewer, action, report_id) {
        return Ok(());
    }
    if viewer.is_none() && action.requires_viewer() {
        Err(ServiceError::Unauthorized(action))
    } else {
        Err(ServiceError::Forbidden(action))
    }
}

fn signed_in(viewer: Option<&Viewer>, action: Action) -> Result<&Viewer, ServiceError> {
    viewer.ok_or(ServiceError::Unauthorized(action))
}

// =============================================================================
// COMMENTS
// =============================================================================

/// # Errors
///
/// Returns a store error if the report does not exist or the read fails.
pub async fn list_comments(
    store: &dyn Store,
    viewer: Option<&Viewer>,
    report_id: &str,
) -> Result<Vec<CommentView>, ServiceError> {
    authorize(viewer, Action::ViewComments, report_id)?;
    Ok(store.list_comments(report_id).await?)
}

/// Persist a comment. The body is trimmed; an empty body is rejected
/// before the store is called.
///
/// # Errors
///
/// `Unauthorized` without a viewer, `EmptyComment` for a blank body, or a
/// store error.
pub async fn post_comment(
    store: &dyn Store,
    viewer: Option<&Viewer>,
    report_id: &str,
    body: &str,
) -> Result<CommentView, ServiceError> {
    authorize(viewer, Action::PostComment, report_id)?;
    let author = signed_in(viewer, Action::PostComment)?;

    let body = body.trim();
    if body.is_empty() {
        return Err(ServiceError::EmptyComment);
    }

    let comment = store.create_comment(report_id, author, body).await?;
    info!(%report_id, comment_id = %comment.id, user_id = %author.user_id, "report: comment created");
    Ok(comment)
}

/// Delete every comment on a report. Admin only.
///
/// # Errors
///
/// `Unauthorized`/`Forbidden` for non-admins, or a store error.
pub async fn clear_comments(store: &dyn Store, viewer: Option<&Viewer>, report_id: &str) -> Result<u64, ServiceError> {
    authorize(viewer, Action::ClearComments, report_id)?;
    let cleared = store.clear_comments(report_id).await?;
    info!(%report_id, cleared, "report: comments cleared");
    Ok(cleared)
}

// =============================================================================
// VOTES
// =============================================================================

/// # Errors
///
/// Returns a store error if the report does not exist or the read fails.
pub async fn vote_status(store: &dyn Store, viewer: Option<&Viewer>, report_id: &str) -> Result<VoteView, ServiceError> {
    authorize(viewer, Action::ViewVote, report_id)?;
    let user_id = viewer.map(|v| v.user_id.as_str());
    Ok(store.vote_status(report_id, user_id).await?)
}

/// # Errors
///
/// `Unauthorized` without a viewer, or a store error.
pub async fn toggle_vote(store: &dyn Store, viewer: Option<&Viewer>, report_id: &str) -> Result<VoteView, ServiceError> {
    authorize(viewer, Action::ToggleVote, report_id)?;
    let voter = signed_in(viewer, Action::ToggleVote)?;
    let vote = store.toggle_vote(report_id, &voter.user_id).await?;
    info!(%report_id, user_id = %voter.user_id, voted = vote.voted, count = vote.count, "report: vote toggled");
    Ok(vote)
}

// =============================================================================
// STATUS
// =============================================================================

/// # Errors
///
/// Returns a store error if the report does not exist or the read fails.
pub async fn report_status(store: &dyn Store, report_id: &str) -> Result<ReportStatus, ServiceError> {
    Ok(store.report_status(report_id).await?)
}

/// Change a report's status. Admin only.
///
/// # Errors
///
/// `Unauthorized`/`Forbidden` for non-admins, or a store error.
pub async fn update_status(
    store: &dyn Store,
    viewer: Option<&Viewer>,
    report_id: &str,
    status: ReportStatus,
) -> Result<ReportStatus, ServiceError> {
    authorize(viewer, Action::UpdateStatus, report_id)?;
    store.update_status(report_id, status).await?;
    info!(%report_id, %status, "report: status updated");
    Ok(status)
}

#[cfg(test)]
#[path = "report_test.rs"]
mod tests;
