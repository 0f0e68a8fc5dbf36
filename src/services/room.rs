//! Room registry: per-report membership and fan-out targets.
//!
//! DESIGN
//! ======
//! A plain struct with no interior locking. It is owned by the dispatcher
//! task (see `dispatch`), which is the only code that ever mutates it.
//!
//! Every live connection is tracked, not only room members, so a global
//! event reaches connections that never joined any room. A room exists only
//! while it has at least one member; the entry is removed when the last
//! member leaves or disconnects.

use std::collections::{HashMap, HashSet};

use events::{BroadcastEvent, ServerEvent};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub connections: usize,
    pub rooms: usize,
}

struct Connection {
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
pub struct RoomRegistry {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live connection and its outbound queue.
    ///
    /// Re-registering an id replaces the queue and keeps its memberships.
    pub fn connect(&mut self, connection_id: ConnectionId, tx: mpsc::Sender<ServerEvent>) {
        self.connections
            .entry(connection_id)
            .and_modify(|conn| conn.tx = tx.clone())
            .or_insert_with(|| Connection { tx, rooms: HashSet::new() });
    }

    /// Add a connection to a report's room. Returns `true` if it was not
    /// already a member. Unknown connections are ignored.
    pub fn join(&mut self, connection_id: ConnectionId, report_id: &str) -> bool {
        let Some(conn) = self.connections.get_mut(&connection_id) else {
            debug!(%connection_id, %report_id, "room: join from unknown connection ignored");
            return false;
        };
        if !conn.rooms.insert(report_id.to_owned()) {
            return false;
        }
        self.rooms
            .entry(report_id.to_owned())
            .or_default()
            .insert(connection_id);
        true
    }

    /// Remove a connection from a report's room. No-op if absent.
    pub fn leave(&mut self, connection_id: ConnectionId, report_id: &str) -> bool {
        let removed = self
            .connections
            .get_mut(&connection_id)
            .is_some_and(|conn| conn.rooms.remove(report_id));
        if removed {
            self.remove_member(report_id, connection_id);
        }
        removed
    }

    /// Drop a connection and remove it from every room it joined.
    /// Returns the reports it was a member of.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Vec<String> {
        let Some(conn) = self.connections.remove(&connection_id) else {
            return Vec::new();
        };
        let mut left: Vec<String> = conn.rooms.into_iter().collect();
        left.sort();
        for report_id in &left {
            self.remove_member(report_id, connection_id);
        }
        left
    }

    /// Connections an event should reach, excluding `origin` for
    /// room-scoped kinds.
    #[must_use]
    pub fn recipients(&self, event: &BroadcastEvent, origin: Option<ConnectionId>) -> Vec<ConnectionId> {
        if event.kind.is_global() {
            return self.connections.keys().copied().collect();
        }
        self.rooms
            .get(&event.report_id)
            .map(|members| {
                members
                    .iter()
                    .copied()
                    .filter(|id| Some(*id) != origin)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Queue an event on every recipient's outbound channel.
    ///
    /// Best-effort: a full or closed queue drops the event for that one
    /// recipient and never blocks the caller.
    pub fn deliver(&self, event: &BroadcastEvent, origin: Option<ConnectionId>) -> Delivery {
        let mut delivery = Delivery::default();
        for connection_id in self.recipients(event, origin) {
            let Some(conn) = self.connections.get(&connection_id) else {
                continue;
            };
            match conn.tx.try_send(event.body.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%connection_id, kind = event.kind.as_str(), report_id = %event.report_id, "room: outbound queue full; event dropped");
                    delivery.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%connection_id, kind = event.kind.as_str(), "room: recipient closing; event dropped");
                    delivery.dropped += 1;
                }
            }
        }
        delivery
    }

    /// Current members of a report's room, sorted for stable output.
    #[must_use]
    pub fn members(&self, report_id: &str) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .rooms
            .get(report_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats { connections: self.connections.len(), rooms: self.rooms.len() }
    }

    fn remove_member(&mut self, report_id: &str, connection_id: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(report_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.rooms.remove(report_id);
            }
        }
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
