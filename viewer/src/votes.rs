//! Vote toggle for one report, from the current viewer's perspective.
//!
//! A click flips `voted` and moves `count` by one immediately, then asks
//! the store. The store's answer overwrites both fields; a failure or
//! timeout restores the pre-click values. Peer broadcasts carry only the
//! aggregate count and never touch `voted`.
//!
//! A peer count that arrives while a toggle is in flight updates the
//! rollback snapshot rather than the displayed value: the optimistic view
//! stays put until the store answers, and a rollback lands on the latest
//! known count.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use events::{ClientEvent, ServerEvent, VoteCount, VoteView};
use tracing::{debug, warn};

use crate::action::{ActionState, CancelGuard, Reconciler, bounded};
use crate::channel::EventSink;
use crate::config::ReconcileConfig;
use crate::error::ReconcileError;
use crate::store::StoreApi;

struct VoteState {
    view: VoteView,
    toggle: ActionState<VoteView>,
}

#[derive(Clone)]
pub struct VoteToggle {
    report_id: String,
    store: Arc<dyn StoreApi>,
    sink: Arc<dyn EventSink>,
    config: ReconcileConfig,
    state: Arc<Mutex<VoteState>>,
}

impl VoteToggle {
    pub fn new(
        report_id: impl Into<String>,
        store: Arc<dyn StoreApi>,
        sink: Arc<dyn EventSink>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            report_id: report_id.into(),
            store,
            sink,
            config,
            state: Arc::new(Mutex::new(VoteState {
                view: VoteView { voted: false, count: 0 },
                toggle: ActionState::Idle,
            })),
        }
    }

    #[must_use]
    pub fn report_id(&self) -> &str {
        &self.report_id
    }

    #[must_use]
    pub fn view(&self) -> VoteView {
        self.lock().view
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lock().toggle.is_pending()
    }

    /// Fetch the authoritative `{voted, count}`. Ignored while a toggle is
    /// in flight; the toggle's own answer wins.
    ///
    /// # Errors
    ///
    /// Store failure or timeout.
    pub async fn load(&self) -> Result<VoteView, ReconcileError> {
        let fetched = bounded(self.config.store_timeout, self.store.vote_status(&self.report_id)).await?;
        let mut state = self.lock();
        if !state.toggle.is_pending() {
            state.view = fetched;
        }
        Ok(state.view)
    }

    /// Toggle this viewer's vote.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Busy`] while a toggle is in flight, otherwise the
    /// store failure or timeout (after rolling back).
    pub async fn toggle(&self) -> Result<VoteView, ReconcileError> {
        {
            let mut state = self.lock();
            let prior = state.view;
            state.toggle.begin("vote toggle", prior)?;
            state.view = flipped(prior);
        }

        let cancel = CancelGuard::new(|| self.settle_cancelled());
        let result = bounded(self.config.store_timeout, self.store.toggle_vote(&self.report_id)).await;
        cancel.disarm();

        let confirmed = {
            let mut state = self.lock();
            match result {
                Ok(confirmed) => {
                    state.toggle.confirm();
                    state.view = confirmed;
                    confirmed
                }
                Err(err) => {
                    if let Some(prior) = state.toggle.roll_back(err.to_string()) {
                        state.view = prior;
                    }
                    warn!(report_id = %self.report_id, error = %err, "votes: toggle rolled back");
                    return Err(err);
                }
            }
        };

        let event = ClientEvent::VoteChange(VoteCount { report_id: self.report_id.clone(), vote_count: confirmed.count });
        if let Err(err) = self.sink.emit(event) {
            warn!(report_id = %self.report_id, error = %err, "votes: broadcast not queued");
        }
        Ok(confirmed)
    }

    /// The caller dropped `toggle` mid-flight: restore the pre-click view.
    fn settle_cancelled(&self) {
        let mut state = self.lock();
        if let Some(prior) = state.toggle.roll_back("cancelled") {
            state.view = prior;
            debug!(report_id = %self.report_id, "votes: toggle cancelled, rolled back");
        }
    }

    fn lock(&self) -> MutexGuard<'_, VoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reconciler for VoteToggle {
    fn apply(&self, event: &ServerEvent) -> bool {
        let ServerEvent::VoteUpdated(update) = event else {
            return false;
        };
        if update.report_id != self.report_id {
            return false;
        }
        let mut state = self.lock();
        if let Some(prior) = state.toggle.prior_mut() {
            prior.count = update.vote_count;
            debug!(report_id = %self.report_id, count = update.vote_count, "votes: peer count held for pending toggle");
            return false;
        }
        let changed = state.view.count != update.vote_count;
        state.view.count = update.vote_count;
        changed
    }
}

fn flipped(view: VoteView) -> VoteView {
    if view.voted {
        VoteView { voted: false, count: view.count.saturating_sub(1) }
    } else {
        VoteView { voted: true, count: view.count.saturating_add(1) }
    }
}

#[cfg(test)]
#[path = "votes_test.rs"]
mod tests;
