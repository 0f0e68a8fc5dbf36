//! In-process fakes shared by the reconciler tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use events::{BroadcastEvent, ClientEvent, CommentView, ReportStatus, Role, VoteView};
use tokio::sync::oneshot;

use crate::action::Reconciler;
use crate::channel::EventSink;
use crate::config::ReconcileConfig;
use crate::error::ClientError;
use crate::store::StoreApi;

pub const BASE_MS: i64 = 1_700_000_000_000;

pub fn comment(report_id: &str, id: &str, created_at: i64) -> CommentView {
    CommentView {
        id: id.into(),
        report_id: report_id.into(),
        author_id: "u-1".into(),
        author_display_name: "Asha".into(),
        author_role: Role::Citizen,
        body: format!("comment {id}"),
        created_at,
    }
}

pub fn fast_config() -> ReconcileConfig {
    ReconcileConfig { store_timeout: std::time::Duration::from_millis(200) }
}

#[derive(Default)]
struct FakeData {
    comments: HashMap<String, Vec<CommentView>>,
    votes: HashMap<String, VoteView>,
    statuses: HashMap<String, ReportStatus>,
    next_id: i64,
}

/// Store fake with a one-shot hold and one-shot failure injection.
#[derive(Default)]
pub struct FakeStore {
    data: Mutex<FakeData>,
    hold: Mutex<Option<oneshot::Receiver<()>>>,
    failure: Mutex<Option<(u16, &'static str)>>,
    calls: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_comments(&self, report_id: &str, comments: Vec<CommentView>) {
        self.data.lock().expect("data").comments.insert(report_id.into(), comments);
    }

    pub fn seed_vote(&self, report_id: &str, view: VoteView) {
        self.data.lock().expect("data").votes.insert(report_id.into(), view);
    }

    pub fn seed_status(&self, report_id: &str, status: ReportStatus) {
        self.data.lock().expect("data").statuses.insert(report_id.into(), status);
    }

    /// The next call waits until the returned sender fires or is dropped.
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.hold.lock().expect("hold") = Some(rx);
        tx
    }

    /// The next call fails with this status and code.
    pub fn fail_next(&self, status: u16, code: &'static str) {
        *self.failure.lock().expect("failure") = Some((status, code));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hold = self.hold.lock().expect("hold").take();
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        match self.failure.lock().expect("failure").take() {
            Some((status, code)) => Err(ClientError::Rejected {
                status,
                code: code.to_owned(),
                message: format!("injected {code}"),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StoreApi for FakeStore {
    async fn list_comments(&self, report_id: &str) -> Result<Vec<CommentView>, ClientError> {
        self.gate().await?;
        Ok(self.data.lock().expect("data").comments.get(report_id).cloned().unwrap_or_default())
    }

    async fn create_comment(&self, report_id: &str, body: &str) -> Result<CommentView, ClientError> {
        self.gate().await?;
        let mut data = self.data.lock().expect("data");
        data.next_id += 1;
        let n = data.next_id;
        let mut created = comment(report_id, &format!("c{n}"), BASE_MS + n * 1_000);
        created.body = body.to_owned();
        data.comments.entry(report_id.into()).or_default().push(created.clone());
        Ok(created)
    }

    async fn clear_comments(&self, report_id: &str) -> Result<u64, ClientError> {
        self.gate().await?;
        let removed = self.data.lock().expect("data").comments.remove(report_id).unwrap_or_default();
        Ok(removed.len() as u64)
    }

    async fn vote_status(&self, report_id: &str) -> Result<VoteView, ClientError> {
        self.gate().await?;
        let data = self.data.lock().expect("data");
        Ok(data.votes.get(report_id).copied().unwrap_or(VoteView { voted: false, count: 0 }))
    }

    async fn toggle_vote(&self, report_id: &str) -> Result<VoteView, ClientError> {
        self.gate().await?;
        let mut data = self.data.lock().expect("data");
        let view = data.votes.entry(report_id.into()).or_insert(VoteView { voted: false, count: 0 });
        view.voted = !view.voted;
        view.count = if view.voted { view.count + 1 } else { view.count.saturating_sub(1) };
        Ok(*view)
    }

    async fn report_status(&self, report_id: &str) -> Result<ReportStatus, ClientError> {
        self.gate().await?;
        let data = self.data.lock().expect("data");
        data.statuses.get(report_id).copied().ok_or_else(|| ClientError::Rejected {
            status: 404,
            code: "E_NOT_FOUND".into(),
            message: format!("report not found: {report_id}"),
        })
    }

    async fn update_status(&self, report_id: &str, status: ReportStatus) -> Result<ReportStatus, ClientError> {
        self.gate().await?;
        self.data.lock().expect("data").statuses.insert(report_id.into(), status);
        Ok(status)
    }
}

/// Sink that records what a reconciler broadcast.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ClientEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emitted(&self) -> Vec<ClientEvent> {
        self.events.lock().expect("events").clone()
    }

    /// Play everything recorded so far into a peer, the way the relay would
    /// fan it out, and forget it.
    pub fn deliver_to(&self, peer: &impl Reconciler) -> usize {
        let drained: Vec<ClientEvent> = std::mem::take(&mut *self.events.lock().expect("events"));
        let mut applied = 0;
        for event in drained {
            if let Some(broadcast) = BroadcastEvent::from_client(event) {
                peer.apply(&broadcast.body);
                applied += 1;
            }
        }
        applied
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ClientEvent) -> Result<(), ClientError> {
        self.events.lock().expect("events").push(event);
        Ok(())
    }
}
