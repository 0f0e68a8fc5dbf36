//! Shared event model and JSON codec for the report broadcast channel.
//!
//! This crate owns the wire representation used by both the relay server and
//! the viewer client. Every channel message is a JSON object of the form
//! `{"event": <name>, "data": <payload>}`; event names and payload field
//! names are fixed here so neither side can drift.
//!
//! DESIGN
//! ======
//! - `ClientEvent` is what a viewer sends, `ServerEvent` is what it receives.
//! - `BroadcastEvent` is the server-internal form of a fan-out request:
//!   `{kind, report_id, body}` where `body` is the `ServerEvent` recipients get.
//! - Events are notifications, never the system of record. Payloads carry the
//!   store-confirmed values so recipients can reconcile without a re-fetch.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by [`encode`] and [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload was not valid JSON or did not match the event schema.
    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Grepable error code and retryable flag for structured error payloads.
pub trait ErrorCode: fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

impl ErrorCode for CodecError {
    fn error_code(&self) -> &'static str {
        "E_BAD_EVENT"
    }
}

/// A status string that is not one of the known [`ReportStatus`] values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown report status: {0}")]
pub struct UnknownStatus(pub String);

// =============================================================================
// DOMAIN PROJECTIONS
// =============================================================================

/// Role of an authenticated user, as resolved by the identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Citizen,
    Admin,
}

impl Role {
    #[must_use]
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Citizen => "CITIZEN",
            Self::Admin => "ADMIN",
        }
    }

    /// Parse a stored role. Anything other than `ADMIN` is a citizen.
    #[must_use]
    pub fn from_stored(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("ADMIN") { Self::Admin } else { Self::Citizen }
    }
}

/// Triage status of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pending,
    Assigned,
    InProgress,
    Resolved,
    Rejected,
}

impl ReportStatus {
    pub const ALL: [Self; 5] = [Self::Pending, Self::Assigned, Self::InProgress, Self::Resolved, Self::Rejected];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::Resolved => "RESOLVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownStatus(s.to_owned()))
    }
}

/// Client-visible projection of a stored comment.
///
/// `id` is assigned by the store at commit time; it is the deduplication key
/// on every receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub report_id: String,
    pub author_id: String,
    pub author_display_name: String,
    pub author_role: Role,
    pub body: String,
    /// Milliseconds since Unix epoch, assigned by the store.
    pub created_at: i64,
}

/// Vote state for one report from one viewer's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteView {
    pub voted: bool,
    pub count: u32,
}

/// Which transport carries a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Websocket,
    Polling,
}

impl TransportKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Websocket => "websocket",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub report_id: String,
    pub comment: CommentView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRef {
    pub report_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCount {
    pub report_id: String,
    pub vote_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub report_id: String,
    pub status: ReportStatus,
}

/// Payload of `chat-cleared`. The report id is an addition over the bare `{}`
/// payload so a viewer watching several reports on one channel can tell them
/// apart; it is omitted when absent and tolerated when missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCleared {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub connection_id: String,
    pub transport: TransportKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Events a viewer sends over its channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinComplaint(String),
    LeaveComplaint(String),
    NewComment(NewComment),
    ClearChat(ReportRef),
    VoteChange(VoteCount),
    StatusUpdate(StatusChange),
}

impl ClientEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinComplaint(_) => "join-complaint",
            Self::LeaveComplaint(_) => "leave-complaint",
            Self::NewComment(_) => "new-comment",
            Self::ClearChat(_) => "clear-chat",
            Self::VoteChange(_) => "vote-change",
            Self::StatusUpdate(_) => "status-update",
        }
    }

    #[must_use]
    pub fn report_id(&self) -> &str {
        match self {
            Self::JoinComplaint(id) | Self::LeaveComplaint(id) => id,
            Self::NewComment(p) => &p.report_id,
            Self::ClearChat(p) => &p.report_id,
            Self::VoteChange(p) => &p.report_id,
            Self::StatusUpdate(p) => &p.report_id,
        }
    }
}

/// Events the server delivers to a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected(Connected),
    CommentReceived(CommentView),
    ChatCleared(ChatCleared),
    VoteUpdated(VoteCount),
    ComplaintStatusChanged(StatusChange),
    Error(ErrorBody),
}

impl ServerEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::CommentReceived(_) => "comment-received",
            Self::ChatCleared(_) => "chat-cleared",
            Self::VoteUpdated(_) => "vote-updated",
            Self::ComplaintStatusChanged(_) => "complaint-status-changed",
            Self::Error(_) => "error",
        }
    }

    /// The report this event concerns, if the payload names one.
    #[must_use]
    pub fn report_id(&self) -> Option<&str> {
        match self {
            Self::CommentReceived(c) => Some(&c.report_id),
            Self::ChatCleared(p) => p.report_id.as_deref(),
            Self::VoteUpdated(p) => Some(&p.report_id),
            Self::ComplaintStatusChanged(p) => Some(&p.report_id),
            Self::Connected(_) | Self::Error(_) => None,
        }
    }

    pub fn error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error(ErrorBody { code: err.error_code().to_owned(), message: err.to_string() })
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Fan-out class of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BroadcastKind {
    CommentPosted,
    CommentCleared,
    VoteChanged,
    StatusChanged,
}

impl BroadcastKind {
    /// Global events reach every connection, including the sender.
    /// Room-scoped events reach the room minus the sender.
    #[must_use]
    pub fn is_global(self) -> bool {
        matches!(self, Self::StatusChanged)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommentPosted => "comment-posted",
            Self::CommentCleared => "comment-cleared",
            Self::VoteChanged => "vote-changed",
            Self::StatusChanged => "status-changed",
        }
    }
}

/// An inbound event tied to a report, in flight from sender to recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEvent {
    pub kind: BroadcastKind,
    pub report_id: String,
    pub body: ServerEvent,
}

impl BroadcastEvent {
    /// Convert a broadcasting client event into its fan-out form.
    ///
    /// Membership events (`join-complaint`, `leave-complaint`) are not
    /// broadcasts and yield `None`.
    #[must_use]
    pub fn from_client(event: ClientEvent) -> Option<Self> {
        match event {
            ClientEvent::JoinComplaint(_) | ClientEvent::LeaveComplaint(_) => None,
            ClientEvent::NewComment(NewComment { report_id, comment }) => Some(Self {
                kind: BroadcastKind::CommentPosted,
                report_id,
                body: ServerEvent::CommentReceived(comment),
            }),
            ClientEvent::ClearChat(ReportRef { report_id }) => Some(Self {
                kind: BroadcastKind::CommentCleared,
                body: ServerEvent::ChatCleared(ChatCleared { report_id: Some(report_id.clone()) }),
                report_id,
            }),
            ClientEvent::VoteChange(payload) => Some(Self {
                kind: BroadcastKind::VoteChanged,
                report_id: payload.report_id.clone(),
                body: ServerEvent::VoteUpdated(payload),
            }),
            ClientEvent::StatusUpdate(payload) => Some(Self {
                kind: BroadcastKind::StatusChanged,
                report_id: payload.report_id.clone(),
                body: ServerEvent::ComplaintStatusChanged(payload),
            }),
        }
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode an event as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode<T: Serialize>(event: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode a JSON text frame into an event.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the text is not a known event.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
