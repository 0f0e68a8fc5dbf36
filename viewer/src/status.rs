//! Report status board: last-value-wins status per report, plus the admin
//! status change. Status changes are not optimistic; the broadcast goes out
//! only after the store accepts the new value.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use events::{ClientEvent, ReportStatus, ServerEvent, StatusChange};
use tracing::{info, warn};

use crate::action::{CancelGuard, Reconciler, bounded};
use crate::channel::EventSink;
use crate::config::ReconcileConfig;
use crate::error::ReconcileError;
use crate::store::StoreApi;

#[derive(Default)]
struct BoardState {
    statuses: HashMap<String, ReportStatus>,
    /// Reports with a status change in flight.
    pending: HashSet<String>,
}

#[derive(Clone)]
pub struct StatusBoard {
    store: Arc<dyn StoreApi>,
    sink: Arc<dyn EventSink>,
    config: ReconcileConfig,
    state: Arc<Mutex<BoardState>>,
}

impl StatusBoard {
    pub fn new(store: Arc<dyn StoreApi>, sink: Arc<dyn EventSink>, config: ReconcileConfig) -> Self {
        Self { store, sink, config, state: Arc::new(Mutex::new(BoardState::default())) }
    }

    #[must_use]
    pub fn status(&self, report_id: &str) -> Option<ReportStatus> {
        self.lock().statuses.get(report_id).copied()
    }

    /// Fetch one report's current status into the board.
    ///
    /// # Errors
    ///
    /// Store failure or timeout.
    pub async fn load(&self, report_id: &str) -> Result<ReportStatus, ReconcileError> {
        let status = bounded(self.config.store_timeout, self.store.report_status(report_id)).await?;
        self.lock().statuses.insert(report_id.to_owned(), status);
        Ok(status)
    }

    /// Admin status change: store first, then broadcast platform-wide.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Busy`] if a change to this report is in flight,
    /// otherwise the store failure (a non-admin gets the store's rejection).
    pub async fn change(&self, report_id: &str, status: ReportStatus) -> Result<ReportStatus, ReconcileError> {
        if !self.lock().pending.insert(report_id.to_owned()) {
            return Err(ReconcileError::Busy("status change"));
        }

        let cancel = CancelGuard::new(|| {
            self.lock().pending.remove(report_id);
        });
        let result = bounded(self.config.store_timeout, self.store.update_status(report_id, status)).await;
        cancel.disarm();

        let applied = {
            let mut state = self.lock();
            state.pending.remove(report_id);
            match result {
                Ok(applied) => {
                    state.statuses.insert(report_id.to_owned(), applied);
                    applied
                }
                Err(err) => {
                    warn!(%report_id, error = %err, "status: change failed");
                    return Err(err);
                }
            }
        };

        info!(%report_id, status = %applied, "status: changed");
        let event = ClientEvent::StatusUpdate(StatusChange { report_id: report_id.to_owned(), status: applied });
        if let Err(err) = self.sink.emit(event) {
            warn!(%report_id, error = %err, "status: broadcast not queued");
        }
        Ok(applied)
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reconciler for StatusBoard {
    fn apply(&self, event: &ServerEvent) -> bool {
        let ServerEvent::ComplaintStatusChanged(change) = event else {
            return false;
        };
        let previous = self.lock().statuses.insert(change.report_id.clone(), change.status);
        previous != Some(change.status)
    }
}

#[cfg(test)]
#[path = "status_test.rs"]
mod tests;
