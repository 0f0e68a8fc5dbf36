use super::*;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use events::{ReportRef, VoteCount, VoteView};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::test_helpers::{BASE_MS, FakeStore, comment, fast_config};
use crate::{CommentThread, VoteToggle, follow};

const WAIT: Duration = Duration::from_secs(2);

/// One accepted connection on the fake relay.
struct FakeConn {
    frames: mpsc::UnboundedReceiver<ClientEvent>,
    /// `None` closes the socket; dropping the sender does too.
    push: mpsc::UnboundedSender<Option<ServerEvent>>,
}

struct FakeRelay {
    addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<FakeConn>,
}

/// A WebSocket relay that greets with `connected` and hands each connection
/// to the test.
async fn spawn_fake_relay() -> FakeRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (conn_tx, accepted) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut next_id = 0_u32;
        while let Ok((stream, _)) = listener.accept().await {
            next_id += 1;
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let hello = ServerEvent::Connected(Connected {
                connection_id: format!("fake-{next_id}"),
                transport: TransportKind::Websocket,
            });
            if ws.send(Message::text(events::encode(&hello).expect("encode"))).await.is_err() {
                continue;
            }

            let (frames_tx, frames) = mpsc::unbounded_channel();
            let (push, mut push_rx) = mpsc::unbounded_channel::<Option<ServerEvent>>();
            if conn_tx.send(FakeConn { frames, push }).is_err() {
                return;
            }
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = ws.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(event) = events::decode::<ClientEvent>(text.as_str()) {
                                    let _ = frames_tx.send(event);
                                }
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        cmd = push_rx.recv() => match cmd {
                            Some(Some(event)) => {
                                let text = events::encode(&event).expect("encode");
                                let _ = ws.send(Message::text(text)).await;
                            }
                            _ => {
                                let _ = ws.close(None).await;
                                break;
                            }
                        },
                    }
                }
            });
        }
    });

    FakeRelay { addr, accepted }
}

/// Long-poll relay that keeps one live session at a time.
#[derive(Default)]
struct PollRelay {
    greet: bool,
    live: Mutex<Option<String>>,
    queue: Mutex<VecDeque<ServerEvent>>,
    ready: Notify,
    opened: AtomicUsize,
    waits: AtomicUsize,
    closed: AtomicUsize,
    posted: Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>,
}

impl PollRelay {
    fn push(&self, event: ServerEvent) {
        self.queue.lock().expect("queue").push_back(event);
        self.ready.notify_waiters();
    }

    /// Forget the live session; its next wait gets a 404.
    fn expire(&self) {
        *self.live.lock().expect("live") = None;
        self.ready.notify_waiters();
    }

    fn is_live(&self, id: &str) -> bool {
        self.live.lock().expect("live").as_deref() == Some(id)
    }
}

async fn poll_open(State(relay): State<Arc<PollRelay>>) -> Json<serde_json::Value> {
    let id = format!("poll-{}", relay.opened.fetch_add(1, Ordering::SeqCst) + 1);
    relay.queue.lock().expect("queue").clear();
    *relay.live.lock().expect("live") = Some(id.clone());
    if relay.greet {
        relay.push(ServerEvent::Connected(Connected { connection_id: id.clone(), transport: TransportKind::Polling }));
    }
    Json(serde_json::json!({ "connectionId": id }))
}

async fn poll_wait(
    State(relay): State<Arc<PollRelay>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Vec<ServerEvent>>, StatusCode> {
    relay.waits.fetch_add(1, Ordering::SeqCst);
    let wait_ms = query.get("waitMs").and_then(|raw| raw.parse().ok()).unwrap_or(0);
    let _ = timeout(Duration::from_millis(wait_ms), async {
        loop {
            let notified = relay.ready.notified();
            if !relay.is_live(&id) || !relay.queue.lock().expect("queue").is_empty() {
                return;
            }
            notified.await;
        }
    })
    .await;
    if !relay.is_live(&id) {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(relay.queue.lock().expect("queue").drain(..).collect()))
}

async fn poll_send(State(relay): State<Arc<PollRelay>>, Path(id): Path<String>, body: String) -> StatusCode {
    if !relay.is_live(&id) {
        return StatusCode::NOT_FOUND;
    }
    match events::decode::<ClientEvent>(&body) {
        Ok(event) if event.report_id() != "report-rejected" => {
            if let Some(posted) = relay.posted.lock().expect("posted").as_ref() {
                let _ = posted.send(event);
            }
            StatusCode::ACCEPTED
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn poll_close(State(relay): State<Arc<PollRelay>>, Path(id): Path<String>) -> StatusCode {
    relay.closed.fetch_add(1, Ordering::SeqCst);
    let mut live = relay.live.lock().expect("live");
    if live.as_deref() == Some(id.as_str()) {
        *live = None;
    }
    StatusCode::NO_CONTENT
}

/// Serve a [`PollRelay`]; posted client events come out of the receiver.
async fn spawn_poll_relay(greet: bool) -> (SocketAddr, Arc<PollRelay>, mpsc::UnboundedReceiver<ClientEvent>) {
    let (posted_tx, posted) = mpsc::unbounded_channel();
    let relay = Arc::new(PollRelay { greet, posted: Mutex::new(Some(posted_tx)), ..PollRelay::default() });
    let app = axum::Router::new()
        .route("/api/poll", post(poll_open))
        .route("/api/poll/{id}", get(poll_wait).post(poll_send).delete(poll_close))
        .with_state(relay.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("poll relay failed");
    });
    (addr, relay, posted)
}

fn polling_config(addr: SocketAddr) -> ChannelConfig {
    ChannelConfig {
        transports: vec![TransportKind::Polling],
        poll_wait: Duration::from_millis(50),
        ..test_config(addr)
    }
}

async fn next_posted(posted: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    timeout(WAIT, posted.recv()).await.expect("post timeout").expect("relay stopped")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn test_config(addr: SocketAddr) -> ChannelConfig {
    ChannelConfig {
        base_url: format!("http://{addr}"),
        transports: vec![TransportKind::Websocket],
        connect_timeout: Duration::from_secs(1),
        backoff_initial: Duration::from_millis(20),
        backoff_max: Duration::from_millis(80),
        poll_wait: Duration::from_millis(200),
        event_buffer: 16,
    }
}

async fn next_conn(relay: &mut FakeRelay) -> FakeConn {
    timeout(WAIT, relay.accepted.recv())
        .await
        .expect("connection timeout")
        .expect("relay stopped")
}

async fn next_frame(conn: &mut FakeConn) -> ClientEvent {
    timeout(WAIT, conn.frames.recv())
        .await
        .expect("frame timeout")
        .expect("connection closed")
}

async fn wait_until(status: &mut watch::Receiver<ChannelStatus>, connected: bool) {
    timeout(WAIT, status.wait_for(|s| s.is_connected() == connected))
        .await
        .expect("status timeout")
        .expect("status sender dropped");
}

fn vote(report_id: &str, vote_count: u32) -> VoteCount {
    VoteCount { report_id: report_id.into(), vote_count }
}

// =============================================================================
// Pure helpers
// =============================================================================

#[test]
fn backoff_doubles_to_cap_and_resets() {
    let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
    let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
    assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);

    backoff.reset();
    assert_eq!(backoff.next_delay(), Duration::from_secs(1));
}

#[test]
fn banner_only_after_grace_while_offline() {
    let now = Instant::now();
    let offline = ChannelStatus { state: ConnectionState::Connecting, since: now };
    let grace = Duration::from_secs(3);

    assert!(!offline.show_banner(grace, now + Duration::from_secs(2)));
    assert!(offline.show_banner(grace, now + Duration::from_secs(4)));

    let online = ChannelStatus { state: ConnectionState::Connected(TransportKind::Polling), since: now };
    assert!(!online.show_banner(grace, now + Duration::from_secs(60)));
}

#[test]
fn ws_url_switches_scheme() {
    assert_eq!(ws_url("http://127.0.0.1:3000").expect("ws").as_str(), "ws://127.0.0.1:3000/api/ws");
    assert_eq!(ws_url("https://city.example.org/").expect("wss").as_str(), "wss://city.example.org/api/ws");
    assert!(ws_url("ftp://city.example.org").is_err());
}

// =============================================================================
// Live channel against a fake relay
// =============================================================================

#[tokio::test]
async fn nothing_connects_before_first_use() {
    let mut relay = spawn_fake_relay().await;
    let channel = Channel::new(test_config(relay.addr));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(relay.accepted.try_recv().is_err());
    assert_eq!(channel.status().borrow().state, ConnectionState::Disconnected);

    let _events = channel.subscribe();
    let _conn = next_conn(&mut relay).await;
    wait_until(&mut channel.status(), true).await;
}

#[tokio::test]
async fn views_are_refcounted_per_report() {
    let mut relay = spawn_fake_relay().await;
    let channel = Channel::new(test_config(relay.addr));

    let first = channel.view("report-42");
    let second = channel.view("report-42");
    let mut conn = next_conn(&mut relay).await;
    assert_eq!(next_frame(&mut conn).await, ClientEvent::JoinComplaint("report-42".into()));

    drop(first);
    assert_eq!(channel.viewed_reports(), vec!["report-42".to_string()]);
    drop(second);
    assert_eq!(next_frame(&mut conn).await, ClientEvent::LeaveComplaint("report-42".into()));
    assert!(channel.viewed_reports().is_empty());

    channel.emit(ClientEvent::ClearChat(ReportRef { report_id: "report-42".into() })).expect("emit");
    assert_eq!(next_frame(&mut conn).await.name(), "clear-chat");
}

#[tokio::test]
async fn reconnect_replays_joins_before_queued_events() {
    let mut relay = spawn_fake_relay().await;
    let mut config = test_config(relay.addr);
    config.backoff_initial = Duration::from_millis(150);
    let channel = Channel::new(config);
    let mut status = channel.status();

    let _view = channel.view("report-7");
    let mut first = next_conn(&mut relay).await;
    assert_eq!(next_frame(&mut first).await, ClientEvent::JoinComplaint("report-7".into()));
    wait_until(&mut status, true).await;

    drop(first);
    wait_until(&mut status, false).await;
    channel.emit(ClientEvent::VoteChange(vote("report-7", 4))).expect("emit while offline");

    let mut second = next_conn(&mut relay).await;
    assert_eq!(next_frame(&mut second).await, ClientEvent::JoinComplaint("report-7".into()));
    assert_eq!(next_frame(&mut second).await, ClientEvent::VoteChange(vote("report-7", 4)));
    wait_until(&mut status, true).await;
}

#[tokio::test]
async fn inbound_events_reach_every_subscriber() {
    let mut relay = spawn_fake_relay().await;
    let channel = Channel::new(test_config(relay.addr));
    let mut a = channel.subscribe();
    let mut b = channel.subscribe();
    let conn = next_conn(&mut relay).await;

    let event = ServerEvent::VoteUpdated(vote("report-7", 9));
    conn.push.send(Some(event.clone())).expect("push");

    for rx in [&mut a, &mut b] {
        let got = timeout(WAIT, rx.recv()).await.expect("event timeout").expect("event");
        assert_eq!(got, event);
    }
}

#[tokio::test]
async fn shutdown_leaves_open_views_and_closes() {
    let mut relay = spawn_fake_relay().await;
    let channel = Channel::new(test_config(relay.addr));
    let view = channel.view("report-3");
    let mut conn = next_conn(&mut relay).await;
    assert_eq!(next_frame(&mut conn).await, ClientEvent::JoinComplaint("report-3".into()));

    timeout(WAIT, channel.shutdown()).await.expect("shutdown timeout");

    assert_eq!(next_frame(&mut conn).await, ClientEvent::LeaveComplaint("report-3".into()));
    assert_eq!(channel.status().borrow().state, ConnectionState::Disconnected);
    assert!(matches!(
        channel.emit(ClientEvent::VoteChange(vote("report-3", 1))),
        Err(ClientError::Closed)
    ));
    drop(view);
    assert!(relay.accepted.try_recv().is_err());
}

#[tokio::test]
async fn unreachable_relay_keeps_retrying_until_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let channel = Channel::new(test_config(addr));
    let _view = channel.view("report-1");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let status = *channel.status().borrow();
    assert!(!status.is_connected());
    assert!(status.show_banner(Duration::ZERO, Instant::now() + Duration::from_millis(1)));

    timeout(WAIT, channel.shutdown()).await.expect("shutdown while offline");
}

#[tokio::test]
async fn followed_reconcilers_fold_in_relay_events() {
    let mut relay = spawn_fake_relay().await;
    let channel = Channel::new(test_config(relay.addr));
    let store = FakeStore::new();
    store.seed_vote("report-7", VoteView { voted: true, count: 2 });
    let sink: Arc<dyn EventSink> = Arc::new(channel.clone());
    let thread = CommentThread::new("report-7", store.clone(), sink.clone(), fast_config());
    let votes = VoteToggle::new("report-7", store.clone(), sink, fast_config());
    votes.load().await.expect("vote load");

    let _thread_follower = follow(thread.clone(), channel.subscribe());
    let _votes_follower = follow(votes.clone(), channel.subscribe());
    let _view = channel.view("report-7");
    let mut conn = next_conn(&mut relay).await;
    assert_eq!(next_frame(&mut conn).await, ClientEvent::JoinComplaint("report-7".into()));

    for event in [
        ServerEvent::CommentReceived(comment("report-7", "c-peer", BASE_MS)),
        ServerEvent::CommentReceived(comment("report-8", "c-elsewhere", BASE_MS)),
        ServerEvent::VoteUpdated(vote("report-7", 5)),
    ] {
        conn.push.send(Some(event)).expect("push");
    }
    eventually(|| votes.view().count == 5 && !thread.comments().is_empty()).await;
    assert_eq!(votes.view(), VoteView { voted: true, count: 5 });
    let ids: Vec<String> = thread.comments().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["c-peer".to_string()]);

    // The relay echoing our own post back must not duplicate it.
    let posted = thread.submit("streetlight out").await.expect("submit");
    let ClientEvent::NewComment(sent) = next_frame(&mut conn).await else {
        panic!("expected new-comment");
    };
    assert_eq!(sent.comment, posted);
    conn.push.send(Some(ServerEvent::CommentReceived(posted.clone()))).expect("push echo");
    let later = comment("report-7", "c-later", BASE_MS + 60_000);
    conn.push.send(Some(ServerEvent::CommentReceived(later))).expect("push later");
    eventually(|| thread.comments().len() >= 3).await;
    let ids: Vec<String> = thread.comments().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["c-peer".to_string(), posted.id, "c-later".to_string()]);
}

// =============================================================================
// Long-poll fallback
// =============================================================================

#[tokio::test]
async fn polling_link_replays_joins_and_relays_both_ways() {
    let (addr, relay, mut posted) = spawn_poll_relay(true).await;
    let channel = Channel::new(polling_config(addr));
    let mut status = channel.status();
    let mut events = channel.subscribe();

    let _view = channel.view("report-9");
    assert_eq!(next_posted(&mut posted).await, ClientEvent::JoinComplaint("report-9".into()));
    wait_until(&mut status, true).await;
    assert_eq!(status.borrow().state, ConnectionState::Connected(TransportKind::Polling));

    let peer = ServerEvent::VoteUpdated(vote("report-9", 3));
    relay.push(peer.clone());
    assert_eq!(timeout(WAIT, events.recv()).await.expect("event timeout").expect("event"), peer);

    // A rejected event is dropped; the link stays up.
    channel.emit(ClientEvent::VoteChange(vote("report-rejected", 1))).expect("emit");
    channel.emit(ClientEvent::VoteChange(vote("report-9", 4))).expect("emit");
    assert_eq!(next_posted(&mut posted).await, ClientEvent::VoteChange(vote("report-9", 4)));
    assert!(status.borrow().is_connected());
    assert_eq!(relay.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_poll_session_reconnects_and_rejoins() {
    let (addr, relay, mut posted) = spawn_poll_relay(true).await;
    let channel = Channel::new(polling_config(addr));
    let mut status = channel.status();

    let _view = channel.view("report-9");
    assert_eq!(next_posted(&mut posted).await, ClientEvent::JoinComplaint("report-9".into()));
    wait_until(&mut status, true).await;

    relay.expire();
    assert_eq!(next_posted(&mut posted).await, ClientEvent::JoinComplaint("report-9".into()));
    assert_eq!(relay.opened.load(Ordering::SeqCst), 2);
    wait_until(&mut status, true).await;

    timeout(WAIT, channel.shutdown()).await.expect("shutdown");
    assert_eq!(next_posted(&mut posted).await, ClientEvent::LeaveComplaint("report-9".into()));
}

#[tokio::test]
async fn abandoned_poll_handshake_stops_polling_and_closes_session() {
    let (addr, relay, _posted) = spawn_poll_relay(false).await;
    let mut config = polling_config(addr);
    config.connect_timeout = Duration::from_millis(120);

    let attempt = connect_any(&config).await;
    assert!(matches!(attempt, Err(ClientError::Timeout(_))));

    eventually(|| relay.closed.load(Ordering::SeqCst) == 1).await;
    let waits = relay.waits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(relay.waits.load(Ordering::SeqCst), waits);
    assert_eq!(relay.opened.load(Ordering::SeqCst), 1);
}
