//! Comment thread for one report.
//!
//! The list is kept ordered by `createdAt` ascending and holds each comment
//! id at most once, whichever path delivered it first (baseline load, local
//! post, or a peer broadcast). A local post is appended only after the
//! store confirms it, so there is nothing to roll back on failure.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use events::{ClientEvent, CommentView, NewComment, ReportRef, ServerEvent};
use tracing::{debug, warn};

use crate::action::{ActionState, CancelGuard, Reconciler, bounded};
use crate::channel::EventSink;
use crate::config::ReconcileConfig;
use crate::error::ReconcileError;
use crate::store::StoreApi;

#[derive(Default)]
struct ThreadState {
    comments: Vec<CommentView>,
    post: ActionState<()>,
    clear: ActionState<()>,
}

#[derive(Clone)]
pub struct CommentThread {
    report_id: String,
    store: Arc<dyn StoreApi>,
    sink: Arc<dyn EventSink>,
    config: ReconcileConfig,
    state: Arc<Mutex<ThreadState>>,
}

impl CommentThread {
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
            state: Arc::new(Mutex::new(ThreadState::default())),
        }
    }

    #[must_use]
    pub fn report_id(&self) -> &str {
        &self.report_id
    }

    #[must_use]
    pub fn comments(&self) -> Vec<CommentView> {
        self.lock().comments.clone()
    }

    #[must_use]
    pub fn is_posting(&self) -> bool {
        self.lock().post.is_pending()
    }

    /// Fetch the full history as the baseline. Comments that arrived live
    /// while the fetch was in flight are merged in, not lost.
    ///
    /// # Errors
    ///
    /// Store failure or timeout; local state is left untouched.
    pub async fn load(&self) -> Result<usize, ReconcileError> {
        let mut baseline = bounded(self.config.store_timeout, self.store.list_comments(&self.report_id)).await?;
        baseline.sort_by_key(|comment| comment.created_at);

        let mut state = self.lock();
        let live = std::mem::replace(&mut state.comments, baseline);
        for comment in live {
            insert_unique(&mut state.comments, comment);
        }
        debug!(report_id = %self.report_id, comments = state.comments.len(), "comments: loaded");
        Ok(state.comments.len())
    }

    /// Post a comment. Blank bodies are refused before any store call.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::EmptyComment`], [`ReconcileError::Busy`] while a
    /// previous post is in flight, or the store failure.
    pub async fn submit(&self, body: &str) -> Result<CommentView, ReconcileError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ReconcileError::EmptyComment);
        }
        self.lock().post.begin("comment post", ())?;

        let cancel = CancelGuard::new(|| {
            self.lock().post.roll_back("cancelled");
        });
        let result = bounded(self.config.store_timeout, self.store.create_comment(&self.report_id, body)).await;
        cancel.disarm();

        let comment = {
            let mut state = self.lock();
            match result {
                Ok(comment) => {
                    state.post.confirm();
                    insert_unique(&mut state.comments, comment.clone());
                    comment
                }
                Err(err) => {
                    state.post.roll_back(err.to_string());
                    warn!(report_id = %self.report_id, error = %err, "comments: post failed");
                    return Err(err);
                }
            }
        };
        self.broadcast(ClientEvent::NewComment(NewComment {
            report_id: self.report_id.clone(),
            comment: comment.clone(),
        }));
        Ok(comment)
    }

    /// Admin bulk delete. Authorization is the store's call.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Busy`] while a clear is in flight, or the store
    /// failure (including a forbidden rejection).
    pub async fn clear(&self) -> Result<u64, ReconcileError> {
        self.lock().clear.begin("comment clear", ())?;

        let cancel = CancelGuard::new(|| {
            self.lock().clear.roll_back("cancelled");
        });
        let result = bounded(self.config.store_timeout, self.store.clear_comments(&self.report_id)).await;
        cancel.disarm();

        let cleared = {
            let mut state = self.lock();
            match result {
                Ok(cleared) => {
                    state.clear.confirm();
                    state.comments.clear();
                    cleared
                }
                Err(err) => {
                    state.clear.roll_back(err.to_string());
                    return Err(err);
                }
            }
        };
        self.broadcast(ClientEvent::ClearChat(ReportRef { report_id: self.report_id.clone() }));
        Ok(cleared)
    }

    fn broadcast(&self, event: ClientEvent) {
        if let Err(err) = self.sink.emit(event) {
            warn!(report_id = %self.report_id, error = %err, "comments: broadcast not queued");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reconciler for CommentThread {
    fn apply(&self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::CommentReceived(comment) if comment.report_id == self.report_id => {
                insert_unique(&mut self.lock().comments, comment.clone())
            }
            ServerEvent::ChatCleared(cleared)
                if cleared.report_id.as_deref().is_none_or(|id| id == self.report_id) =>
            {
                let mut state = self.lock();
                let changed = !state.comments.is_empty();
                state.comments.clear();
                changed
            }
            _ => false,
        }
    }
}

/// Insert keeping `createdAt` order; equal timestamps keep arrival order.
/// Returns `false` if the id is already present.
fn insert_unique(comments: &mut Vec<CommentView>, comment: CommentView) -> bool {
    if comments.iter().any(|existing| existing.id == comment.id) {
        return false;
    }
    let at = comments.partition_point(|existing| existing.created_at <= comment.created_at);
    comments.insert(at, comment);
    true
}

#[cfg(test)]
#[path = "comments_test.rs"]
mod tests;
