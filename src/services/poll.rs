//! Long-poll sessions: the fallback transport behind `/api/poll`.
//!
//! DESIGN
//! ======
//! A poll session is a dispatcher connection whose outbound queue is drained
//! by HTTP requests instead of a socket. Sessions live in a map keyed by
//! connection id; removing the entry is what triggers `disconnect`, so a
//! session is torn down exactly once whether the client closes it or the
//! reaper expires it.
//!
//! Concurrent `recv` calls on one session serialize on the receiver lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use events::{Connected, ErrorCode, ServerEvent, TransportKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;
use uuid::Uuid;

use super::dispatch::DispatcherHandle;
use super::room::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("unknown poll session: {0}")]
    UnknownSession(ConnectionId),
}

impl ErrorCode for PollError {
    fn error_code(&self) -> &'static str {
        "E_UNKNOWN_SESSION"
    }
}

struct PollSession {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ServerEvent>>>,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct PollSessions {
    dispatcher: DispatcherHandle,
    capacity: usize,
    sessions: Arc<Mutex<HashMap<ConnectionId, PollSession>>>,
}

impl PollSessions {
    #[must_use]
    pub fn new(dispatcher: DispatcherHandle, capacity: usize) -> Self {
        Self { dispatcher, capacity: capacity.max(1), sessions: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Open a session and register it with the dispatcher. The first event
    /// the client polls is `connected`.
    #[must_use]
    pub fn open(&self) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.capacity);
        let hello = ServerEvent::Connected(Connected {
            connection_id: connection_id.to_string(),
            transport: TransportKind::Polling,
        });
        let queued = tx.try_send(hello);
        debug_assert!(queued.is_ok(), "fresh poll queue refused the connected event");

        self.lock().insert(
            connection_id,
            PollSession { rx: Arc::new(tokio::sync::Mutex::new(rx)), last_seen: Instant::now() },
        );
        self.dispatcher.connect(connection_id, tx);
        info!(%connection_id, "poll: session opened");
        connection_id
    }

    /// Mark a session as active.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::UnknownSession`] if the session does not exist.
    pub fn touch(&self, connection_id: ConnectionId) -> Result<(), PollError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(&connection_id)
            .ok_or(PollError::UnknownSession(connection_id))?;
        session.last_seen = Instant::now();
        Ok(())
    }

    /// Wait up to `wait` for the first queued event, then drain whatever
    /// else is queued, up to `batch_max` events in total. An empty vec
    /// means the wait elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::UnknownSession`] if the session does not exist
    /// or was closed while waiting.
    pub async fn recv(
        &self,
        connection_id: ConnectionId,
        wait: Duration,
        batch_max: usize,
    ) -> Result<Vec<ServerEvent>, PollError> {
        let rx = {
            let mut sessions = self.lock();
            let session = sessions
                .get_mut(&connection_id)
                .ok_or(PollError::UnknownSession(connection_id))?;
            session.last_seen = Instant::now();
            Arc::clone(&session.rx)
        };

        let mut rx = rx.lock().await;
        let mut batch = Vec::new();
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(first)) => batch.push(first),
            Ok(None) => return Err(PollError::UnknownSession(connection_id)),
            Err(_) => {}
        }
        while batch.len() < batch_max.max(1) {
            match rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        drop(rx);

        // A long wait is activity, not idleness. The session may have been
        // closed meanwhile, in which case the events are still returned.
        let _ = self.touch(connection_id);
        Ok(batch)
    }

    /// Close a session. Returns `false` if it did not exist.
    pub fn close(&self, connection_id: ConnectionId) -> bool {
        let removed = self.lock().remove(&connection_id).is_some();
        if removed {
            self.dispatcher.disconnect(connection_id);
            info!(%connection_id, "poll: session closed");
        }
        removed
    }

    /// Close every session idle for longer than `idle_timeout` as of `now`.
    pub fn reap_idle(&self, now: Instant, idle_timeout: Duration) -> Vec<ConnectionId> {
        let expired: Vec<ConnectionId> = {
            let mut sessions = self.lock();
            let ids: Vec<ConnectionId> = sessions
                .iter()
                .filter(|(_, s)| now.saturating_duration_since(s.last_seen) > idle_timeout)
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                sessions.remove(id);
            }
            ids
        };
        for connection_id in &expired {
            self.dispatcher.disconnect(*connection_id);
            info!(%connection_id, "poll: idle session reaped");
        }
        expired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, PollSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Spawn the idle-session reaper. Returns a handle for shutdown.
pub fn spawn_reaper(sessions: PollSessions, idle_timeout: Duration) -> JoinHandle<()> {
    let period = (idle_timeout / 2).max(Duration::from_secs(1));
    info!(idle_timeout_secs = idle_timeout.as_secs(), "poll: idle reaper configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sessions.reap_idle(Instant::now(), idle_timeout);
        }
    })
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;
