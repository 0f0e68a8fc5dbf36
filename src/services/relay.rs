//! Inbound event handling shared by the WebSocket and long-poll transports.
//!
//! Membership events go to the dispatcher as join/leave; the four
//! broadcasting events become `BroadcastEvent`s with the sender as origin.
//! No authorization happens here: the store boundary has already checked
//! the action that produced the event.

use events::{BroadcastEvent, ClientEvent, CodecError, ErrorCode, ServerEvent};
use tracing::{info, warn};

use super::dispatch::DispatcherHandle;
use super::room::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Decode(#[from] CodecError),
    #[error("{0} requires a non-empty reportId")]
    EmptyReportId(&'static str),
}

impl ErrorCode for RelayError {
    fn error_code(&self) -> &'static str {
        "E_BAD_EVENT"
    }
}

/// Apply one decoded client event on behalf of `connection_id`.
///
/// # Errors
///
/// Returns [`RelayError::EmptyReportId`] if the event names no report.
pub fn handle_client_event(
    dispatcher: &DispatcherHandle,
    connection_id: ConnectionId,
    event: ClientEvent,
) -> Result<(), RelayError> {
    if event.report_id().trim().is_empty() {
        return Err(RelayError::EmptyReportId(event.name()));
    }

    info!(%connection_id, event = event.name(), report_id = %event.report_id(), "relay: recv event");

    match event {
        ClientEvent::JoinComplaint(report_id) => dispatcher.join(connection_id, report_id),
        ClientEvent::LeaveComplaint(report_id) => dispatcher.leave(connection_id, report_id),
        other => {
            if let Some(broadcast) = BroadcastEvent::from_client(other) {
                dispatcher.dispatch(Some(connection_id), broadcast);
            }
        }
    }
    Ok(())
}

/// Decode and apply one inbound text frame.
///
/// Returns an `error` event for the sender if the frame was rejected; the
/// connection stays open either way.
pub fn handle_inbound_text(dispatcher: &DispatcherHandle, connection_id: ConnectionId, text: &str) -> Option<ServerEvent> {
    let result = events::decode::<ClientEvent>(text)
        .map_err(RelayError::from)
        .and_then(|event| handle_client_event(dispatcher, connection_id, event));

    match result {
        Ok(()) => None,
        Err(e) => {
            warn!(%connection_id, error = %e, "relay: rejected inbound event");
            Some(ServerEvent::error(&e))
        }
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
