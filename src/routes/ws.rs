//! WebSocket handler: the primary channel transport.
//!
//! DESIGN
//! ======
//! On upgrade, assigns a connection id, registers an outbound queue with the
//! dispatcher, and enters a `select!` loop:
//! - Incoming client events → shared relay (join/leave/broadcast)
//! - Queued events from the dispatcher → forward to client
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register → send `connected` with `connectionId`
//! 2. Client events → relay; rejected frames get an `error` event back
//! 3. Close or socket error → `disconnect` exactly once

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use events::{Connected, ServerEvent, TransportKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::relay;
use crate::state::AppState;

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<ServerEvent>(state.config.client_channel_capacity);
    state.dispatcher.connect(connection_id, client_tx);

    let hello = ServerEvent::Connected(Connected {
        connection_id: connection_id.to_string(),
        transport: TransportKind::Websocket,
    });

    if send_event(&mut socket, &hello).await.is_ok() {
        info!(%connection_id, "ws: client connected");
        loop {
            tokio::select! {
                msg = socket.recv() => {
                    let Some(Ok(msg)) = msg else { break };
                    match msg {
                        Message::Text(text) => {
                            if let Some(reply) = relay::handle_inbound_text(&state.dispatcher, connection_id, text.as_str())
                                && send_event(&mut socket, &reply).await.is_err()
                            {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(event) = client_rx.recv() => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    state.dispatcher.disconnect(connection_id);
    info!(%connection_id, "ws: client disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let json = match events::encode(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, event = event.name(), "ws: failed to serialize event");
            return Err(());
        }
    };
    debug!(event = event.name(), report_id = ?event.report_id(), "ws: send event");
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
