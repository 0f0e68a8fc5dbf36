//! Store: the durable system of record behind the broadcast layer.
//!
//! ARCHITECTURE
//! ============
//! Comments, votes, report status, and sessions live in the store. The
//! broadcast channel only ever carries copies of values the store has already
//! confirmed. Route handlers reach the store through services, never directly.
//!
//! Two backends implement [`Store`]: `PgStore` for Postgres and `MemoryStore`
//! for single-process runs without a database and for tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use events::{CommentView, ErrorCode, ReportStatus, Role, VoteView};
use serde::Serialize;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// =============================================================================
// TYPES
// =============================================================================

/// Identity resolved from a session: who is acting and with which role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("report not found: {0}")]
    ReportNotFound(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ReportNotFound(_) => "E_NOT_FOUND",
            Self::UnknownUser(_) => "E_UNAUTHORIZED",
            Self::Database(_) => "E_STORE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Name shown next to a comment.
///
/// `Citizen` is the sign-up placeholder and is treated like a missing name.
#[must_use]
pub fn display_name(name: Option<&str>, email: Option<&str>) -> String {
    if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty() && *n != "Citizen") {
        return name.to_owned();
    }
    email
        .and_then(|e| e.split('@').next())
        .map(str::trim)
        .filter(|local| !local.is_empty())
        .unwrap_or("User")
        .to_owned()
}

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve a session token to the acting user. Unknown or expired tokens
    /// resolve to `None`.
    async fn resolve_session(&self, token: &str) -> Result<Option<Viewer>, StoreError>;

    /// Full comment history for a report, ascending by `created_at`.
    async fn list_comments(&self, report_id: &str) -> Result<Vec<CommentView>, StoreError>;

    /// Persist a comment and return it with its store-assigned id.
    async fn create_comment(&self, report_id: &str, author: &Viewer, body: &str)
    -> Result<CommentView, StoreError>;

    /// Delete every comment on a report. Returns how many were removed.
    async fn clear_comments(&self, report_id: &str) -> Result<u64, StoreError>;

    /// Vote state for a report. `user_id` of `None` reports `voted: false`.
    async fn vote_status(&self, report_id: &str, user_id: Option<&str>) -> Result<VoteView, StoreError>;

    /// Add the user's vote if absent, remove it if present; return the result.
    async fn toggle_vote(&self, report_id: &str, user_id: &str) -> Result<VoteView, StoreError>;

    async fn report_status(&self, report_id: &str) -> Result<ReportStatus, StoreError>;

    async fn update_status(&self, report_id: &str, status: ReportStatus) -> Result<(), StoreError>;
}
