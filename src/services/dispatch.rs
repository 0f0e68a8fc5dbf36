//! Broadcast dispatcher: the single event loop that owns the room registry.
//!
//! DESIGN
//! ======
//! One tokio task holds the `RoomRegistry` by value and drains an unbounded
//! command queue in arrival order. Transports talk to it only through a
//! cloneable `DispatcherHandle`, so membership is never touched from more
//! than one place and no lock is needed.
//!
//! Commands are fire-and-forget except the `stats`/`members` queries, which
//! answer over a oneshot. Per-recipient FIFO follows from the single loop
//! feeding each connection's own bounded queue.
//!
//! The loop exits once every handle has been dropped.

use events::{BroadcastEvent, ServerEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::room::{ConnectionId, RegistryStats, RoomRegistry};

enum Command {
    Connect { connection_id: ConnectionId, tx: mpsc::Sender<ServerEvent> },
    Join { connection_id: ConnectionId, report_id: String },
    Leave { connection_id: ConnectionId, report_id: String },
    Disconnect { connection_id: ConnectionId },
    Dispatch { origin: Option<ConnectionId>, event: BroadcastEvent },
    Stats { reply: oneshot::Sender<RegistryStats> },
    Members { report_id: String, reply: oneshot::Sender<Vec<ConnectionId>> },
}

#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl DispatcherHandle {
    pub fn connect(&self, connection_id: ConnectionId, tx: mpsc::Sender<ServerEvent>) {
        self.send(Command::Connect { connection_id, tx });
    }

    pub fn join(&self, connection_id: ConnectionId, report_id: impl Into<String>) {
        self.send(Command::Join { connection_id, report_id: report_id.into() });
    }

    pub fn leave(&self, connection_id: ConnectionId, report_id: impl Into<String>) {
        self.send(Command::Leave { connection_id, report_id: report_id.into() });
    }

    /// Tear down a connection. Call exactly once per connection.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.send(Command::Disconnect { connection_id });
    }

    /// Fan an event out. Room-scoped kinds skip `origin`.
    pub fn dispatch(&self, origin: Option<ConnectionId>, event: BroadcastEvent) {
        self.send(Command::Dispatch { origin, event });
    }

    /// Registry counts. `None` if the loop has stopped.
    pub async fn stats(&self) -> Option<RegistryStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply });
        rx.await.ok()
    }

    /// Members of a report's room, sorted. Empty if the loop has stopped.
    pub async fn members(&self, report_id: impl Into<String>) -> Vec<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Members { report_id: report_id.into(), reply });
        rx.await.unwrap_or_default()
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("dispatch: loop stopped; command dropped");
        }
    }
}

/// Spawn the dispatcher loop. Returns the handle and the task for shutdown.
#[must_use]
pub fn spawn_dispatcher() -> (DispatcherHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(RoomRegistry::new(), rx));
    (DispatcherHandle { tx }, task)
}

async fn run(mut registry: RoomRegistry, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        apply(&mut registry, command);
    }
    debug!("dispatch: all handles dropped; loop exiting");
}

fn apply(registry: &mut RoomRegistry, command: Command) {
    match command {
        Command::Connect { connection_id, tx } => {
            registry.connect(connection_id, tx);
            info!(%connection_id, "dispatch: connection registered");
        }
        Command::Join { connection_id, report_id } => {
            if registry.join(connection_id, &report_id) {
                info!(%connection_id, %report_id, "dispatch: joined room");
            }
        }
        Command::Leave { connection_id, report_id } => {
            if registry.leave(connection_id, &report_id) {
                info!(%connection_id, %report_id, "dispatch: left room");
            }
        }
        Command::Disconnect { connection_id } => {
            let left = registry.disconnect(connection_id);
            info!(%connection_id, rooms = left.len(), "dispatch: connection removed");
        }
        Command::Dispatch { origin, event } => {
            let delivery = registry.deliver(&event, origin);
            info!(
                origin = ?origin,
                kind = event.kind.as_str(),
                report_id = %event.report_id,
                delivered = delivery.delivered,
                dropped = delivery.dropped,
                "dispatch: broadcast"
            );
        }
        Command::Stats { reply } => {
            let _ = reply.send(registry.stats());
        }
        Command::Members { report_id, reply } => {
            let _ = reply.send(registry.members(&report_id));
        }
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
