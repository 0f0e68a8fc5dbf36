//! Shared plumbing for reconcilers: the per-action pending guard, the
//! store-call timeout, and the loop that feeds channel events in.

use std::future::Future;
use std::time::Duration;

use events::ServerEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{ClientError, ReconcileError};

/// Lifecycle of one locally initiated action.
///
/// `prior` is the snapshot an optimistic change rolls back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState<T> {
    Idle,
    Pending {
        prior: T,
    },
    Confirmed,
    RolledBack {
        reason: String,
    },
}

impl<T> Default for ActionState<T> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<T> ActionState<T> {
    /// Enter `Pending`. A second `begin` while pending is refused.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Busy`] naming `action` if already pending.
    pub fn begin(&mut self, action: &'static str, prior: T) -> Result<(), ReconcileError> {
        if self.is_pending() {
            return Err(ReconcileError::Busy(action));
        }
        *self = Self::Pending { prior };
        Ok(())
    }

    /// Settle as confirmed, returning the snapshot if one was pending.
    pub fn confirm(&mut self) -> Option<T> {
        match std::mem::replace(self, Self::Confirmed) {
            Self::Pending { prior } => Some(prior),
            previous => {
                *self = previous;
                None
            }
        }
    }

    /// Settle as rolled back, returning the snapshot to restore.
    pub fn roll_back(&mut self, reason: impl Into<String>) -> Option<T> {
        match std::mem::replace(self, Self::RolledBack { reason: reason.into() }) {
            Self::Pending { prior } => Some(prior),
            previous => {
                *self = previous;
                None
            }
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// The pending snapshot, for updates that arrive mid-flight.
    pub fn prior_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Pending { prior } => Some(prior),
            _ => None,
        }
    }
}

/// Settles a pending action if the future driving it is dropped before the
/// store answers. Call [`CancelGuard::disarm`] once the answer is in hand.
pub(crate) struct CancelGuard<F: FnOnce()> {
    on_cancel: Option<F>,
}

impl<F: FnOnce()> CancelGuard<F> {
    pub(crate) fn new(on_cancel: F) -> Self {
        Self { on_cancel: Some(on_cancel) }
    }

    pub(crate) fn disarm(mut self) {
        self.on_cancel = None;
    }
}

impl<F: FnOnce()> Drop for CancelGuard<F> {
    fn drop(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

/// Run a store call under the reconciler timeout.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ReconcileError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ReconcileError::Timeout(limit)),
    }
}

/// Anything that folds channel events into local state.
pub trait Reconciler: Clone + Send + Sync + 'static {
    /// Apply one inbound event. Returns `true` if local state changed.
    fn apply(&self, event: &ServerEvent) -> bool;
}

/// Feed every event from `events` into `reconciler` until the channel
/// closes.
///
/// A lagged receiver skips what it missed; the next full load restores it.
pub fn follow<R: Reconciler>(reconciler: R, mut events: broadcast::Receiver<ServerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    reconciler.apply(&event);
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "reconcile: subscriber lagged"),
                Err(RecvError::Closed) => return,
            }
        }
    })
}

#[cfg(test)]
#[path = "action_test.rs"]
mod tests;
