//! Event channel: the viewer's single logical connection to the relay.
//!
//! LIFECYCLE
//! =========
//! `Disconnected -> Connecting -> Connected`, published on a watch channel
//! together with the instant of the last change. A background task owns
//! the transport. It starts on first use (`view`, `emit`, `subscribe`) and
//! runs until `shutdown` or until every handle is dropped.
//!
//! Each connect attempt walks the configured transports in order; the first
//! that completes the `connected` handshake wins. Right after connecting the
//! task re-joins every report that still has a live `RoomView`, then flushes
//! outbound events queued while offline. Join and leave are tracked per
//! link so each report is joined at most once per connection. A lost link
//! is retried with exponential backoff.
//!
//! Both transports feed a reader task into a bounded queue so the task's
//! select loop never cancels an in-flight read. A reader stops as soon as
//! its queue's receiver is gone, including when a connect attempt is
//! abandoned mid-handshake; an orphaned long-poll reader closes its relay
//! session on the way out.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use events::{ClientEvent, Connected, ServerEvent, TransportKind};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::error::ClientError;
use crate::store::{api_url, read_json, rejection};

/// Slack on top of the requested long-poll wait before the HTTP request
/// itself is abandoned.
const POLL_REQUEST_GRACE: Duration = Duration::from_secs(10);

// =============================================================================
// STATUS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(TransportKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    /// When `state` last changed.
    pub since: Instant,
}

impl ChannelStatus {
    #[must_use]
    pub fn new(state: ConnectionState) -> Self {
        Self { state, since: Instant::now() }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }

    /// Whether a "reconnecting" banner should be visible: the channel has
    /// been without a link for longer than `grace`.
    #[must_use]
    pub fn show_banner(&self, grace: Duration, now: Instant) -> bool {
        !self.is_connected() && now.saturating_duration_since(self.since) > grace
    }
}

// =============================================================================
// BACKOFF
// =============================================================================

/// Doubling reconnect delay, capped, reset on success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self { initial, max, next: initial }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// WebSocket endpoint for an `http(s)` base URL.
///
/// # Errors
///
/// Returns [`ClientError::InvalidBaseUrl`] for anything but http or https.
pub fn ws_url(base_url: &str) -> Result<Url, ClientError> {
    let mut url = api_url(base_url, &["ws"])?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return Err(ClientError::InvalidBaseUrl(base_url.to_owned())),
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidBaseUrl(base_url.to_owned()))?;
    Ok(url)
}

// =============================================================================
// HANDLE
// =============================================================================

/// Where reconcilers send their broadcasts.
pub trait EventSink: Send + Sync {
    /// Queue an event for the relay. Delivery is best-effort.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] once the channel has shut down.
    fn emit(&self, event: ClientEvent) -> Result<(), ClientError>;
}

enum Command {
    Emit(ClientEvent),
    /// Membership changes. Dropped while offline since every connect
    /// replays the current views.
    Join(String),
    Leave(String),
    Shutdown,
}

/// State handed to the background task when it starts.
struct Startup {
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ChannelStatus>,
}

struct Shared {
    config: ChannelConfig,
    commands: mpsc::UnboundedSender<Command>,
    startup: Mutex<Option<Startup>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Report id -> number of live `RoomView`s.
    views: Arc<Mutex<HashMap<String, usize>>>,
    status: watch::Receiver<ChannelStatus>,
    events: broadcast::Sender<ServerEvent>,
}

/// Cloneable handle to the viewer's event channel.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    /// Create an idle channel. Nothing connects until first use.
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ChannelStatus::new(ConnectionState::Disconnected));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                commands,
                startup: Mutex::new(Some(Startup { commands: commands_rx, status: status_tx })),
                task: Mutex::new(None),
                views: Arc::new(Mutex::new(HashMap::new())),
                status,
                events,
            }),
        }
    }

    /// Start viewing a report. The first view of a report joins its room;
    /// dropping the last one leaves it.
    pub fn view(&self, report_id: impl Into<String>) -> RoomView {
        self.ensure_started();
        let report_id = report_id.into();
        let first = {
            let mut views = lock(&self.shared.views);
            let count = views.entry(report_id.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            self.send(Command::Join(report_id.clone()));
        }
        RoomView { channel: self.clone(), report_id }
    }

    /// Receive every inbound event. Subscribers filter by report themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.ensure_started();
        self.shared.events.subscribe()
    }

    /// Watch connection state changes. Does not start the channel.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status.clone()
    }

    /// Reports with at least one live view, sorted.
    #[must_use]
    pub fn viewed_reports(&self) -> Vec<String> {
        let mut reports: Vec<String> = lock(&self.shared.views).keys().cloned().collect();
        reports.sort();
        reports
    }

    /// Leave every viewed report, close the transport and stop the task.
    ///
    /// Events queued before the call are flushed first if a link is up.
    pub async fn shutdown(&self) {
        let reports: Vec<String> = {
            let mut views = lock(&self.shared.views);
            let mut reports: Vec<String> = views.drain().map(|(report_id, _)| report_id).collect();
            reports.sort();
            reports
        };
        for report_id in reports {
            self.send(Command::Leave(report_id));
        }
        let _ = self.shared.commands.send(Command::Shutdown);

        // Never started: drop the receiver so later sends fail.
        lock(&self.shared.startup).take();

        let task = lock(&self.shared.task).take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "channel: task ended abnormally");
            }
        }
    }

    fn ensure_started(&self) {
        let Some(startup) = lock(&self.shared.startup).take() else {
            return;
        };
        let task = tokio::spawn(run(
            self.shared.config.clone(),
            startup,
            Arc::clone(&self.shared.views),
            self.shared.events.clone(),
        ));
        *lock(&self.shared.task) = Some(task);
    }

    fn send(&self, command: Command) {
        if self.shared.commands.send(command).is_err() {
            debug!("channel: closed; event discarded");
        }
    }

    fn release(&self, report_id: &str) {
        let last = {
            let mut views = lock(&self.shared.views);
            match views.get_mut(report_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    views.remove(report_id);
                    true
                }
                None => false,
            }
        };
        if last {
            self.send(Command::Leave(report_id.to_owned()));
        }
    }
}

impl EventSink for Channel {
    fn emit(&self, event: ClientEvent) -> Result<(), ClientError> {
        self.ensure_started();
        self.shared
            .commands
            .send(Command::Emit(event))
            .map_err(|_| ClientError::Closed)
    }
}

/// Guard for one open view of a report.
pub struct RoomView {
    channel: Channel,
    report_id: String,
}

impl RoomView {
    #[must_use]
    pub fn report_id(&self) -> &str {
        &self.report_id
    }
}

impl Drop for RoomView {
    fn drop(&mut self) {
        self.channel.release(&self.report_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// TASK
// =============================================================================

enum Exit {
    Shutdown,
    Lost(ClientError),
}

async fn run(
    config: ChannelConfig,
    startup: Startup,
    views: Arc<Mutex<HashMap<String, usize>>>,
    events: broadcast::Sender<ServerEvent>,
) {
    let Startup { mut commands, status } = startup;
    let mut backoff = Backoff::new(config.backoff_initial, config.backoff_max);
    let mut outbox: VecDeque<ClientEvent> = VecDeque::new();

    loop {
        set_state(&status, ConnectionState::Connecting);
        match connect_any(&config).await {
            Ok(mut link) => {
                backoff.reset();
                match serve(&mut link, &views, &status, &mut commands, &mut outbox, &events).await {
                    Exit::Shutdown => {
                        link.close().await;
                        set_state(&status, ConnectionState::Disconnected);
                        info!("channel: shut down");
                        return;
                    }
                    Exit::Lost(err) => {
                        warn!(transport = %link.kind, connection_id = %link.connection_id, error = %err, "channel: link lost");
                        link.close().await;
                    }
                }
            }
            Err(err) => warn!(error = %err, "channel: connect failed"),
        }

        set_state(&status, ConnectionState::Disconnected);
        let delay = backoff.next_delay();
        debug!(?delay, queued = outbox.len(), "channel: reconnecting after backoff");
        if !wait_backoff(delay, &mut commands, &mut outbox).await {
            info!("channel: shut down while disconnected");
            return;
        }
    }
}

/// Replay room joins, flush the outbox, then pump until the link drops or
/// shutdown is requested.
async fn serve(
    link: &mut Link,
    views: &Mutex<HashMap<String, usize>>,
    status: &watch::Sender<ChannelStatus>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    outbox: &mut VecDeque<ClientEvent>,
    events: &broadcast::Sender<ServerEvent>,
) -> Exit {
    let rooms: Vec<String> = {
        let mut rooms: Vec<String> = lock(views).keys().cloned().collect();
        rooms.sort();
        rooms
    };
    let mut joined: HashSet<String> = HashSet::new();
    for report_id in rooms {
        if let Err(err) = link.send(&ClientEvent::JoinComplaint(report_id.clone())).await {
            return Exit::Lost(err);
        }
        joined.insert(report_id);
    }
    set_state(status, ConnectionState::Connected(link.kind));
    info!(transport = %link.kind, connection_id = %link.connection_id, rooms = joined.len(), "channel: connected");

    while let Some(event) = outbox.pop_front() {
        if let Err(err) = link.send(&event).await {
            outbox.push_front(event);
            return Exit::Lost(err);
        }
    }

    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Emit(event)) => {
                    if let Err(err) = link.send(&event).await {
                        outbox.push_front(event);
                        return Exit::Lost(err);
                    }
                }
                Some(Command::Join(report_id)) => {
                    let viewed = lock(views).contains_key(&report_id);
                    if viewed && joined.insert(report_id.clone()) {
                        if let Err(err) = link.send(&ClientEvent::JoinComplaint(report_id)).await {
                            return Exit::Lost(err);
                        }
                    }
                }
                Some(Command::Leave(report_id)) => {
                    if joined.remove(&report_id) {
                        if let Err(err) = link.send(&ClientEvent::LeaveComplaint(report_id)).await {
                            return Exit::Lost(err);
                        }
                    }
                }
                Some(Command::Shutdown) | None => return Exit::Shutdown,
            },
            inbound = link.inbound.recv() => match inbound {
                Some(event) => publish(events, event),
                None => return Exit::Lost(ClientError::Closed),
            },
        }
    }
}

/// Sleep out the backoff while still queueing emits. Returns `false` if
/// shutdown was requested.
async fn wait_backoff(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    outbox: &mut VecDeque<ClientEvent>,
) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => return true,
            command = commands.recv() => match command {
                Some(Command::Emit(event)) => outbox.push_back(event),
                Some(Command::Join(_) | Command::Leave(_)) => {}
                Some(Command::Shutdown) | None => return false,
            },
        }
    }
}

fn publish(events: &broadcast::Sender<ServerEvent>, event: ServerEvent) {
    match &event {
        ServerEvent::Error(body) => warn!(code = %body.code, message = %body.message, "channel: relay error"),
        ServerEvent::Connected(_) => debug!("channel: duplicate connected event"),
        other => debug!(event = other.name(), report_id = other.report_id().unwrap_or("-"), "channel: received"),
    }
    // No subscribers is fine.
    let _ = events.send(event);
}

fn set_state(status: &watch::Sender<ChannelStatus>, state: ConnectionState) {
    status.send_if_modified(|current| {
        if current.state == state {
            return false;
        }
        *current = ChannelStatus::new(state);
        true
    });
}

async fn connect_any(config: &ChannelConfig) -> Result<Link, ClientError> {
    let mut last_err = ClientError::Closed;
    for &kind in &config.transports {
        match tokio::time::timeout(config.connect_timeout, Link::connect(kind, config)).await {
            Ok(Ok(link)) => return Ok(link),
            Ok(Err(err)) => {
                debug!(transport = %kind, error = %err, "channel: transport unavailable");
                last_err = err;
            }
            Err(_) => {
                debug!(transport = %kind, "channel: transport connect timed out");
                last_err = ClientError::Timeout(config.connect_timeout);
            }
        }
    }
    Err(last_err)
}

// =============================================================================
// TRANSPORTS
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Writer {
    Websocket(SplitSink<WsStream, Message>),
    Polling { http: reqwest::Client, session_url: Url },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenResponse {
    connection_id: String,
}

/// One established transport connection.
struct Link {
    kind: TransportKind,
    connection_id: String,
    inbound: mpsc::Receiver<ServerEvent>,
    writer: Writer,
    reader: JoinHandle<()>,
}

impl Link {
    async fn connect(kind: TransportKind, config: &ChannelConfig) -> Result<Self, ClientError> {
        let (tx, mut inbound) = mpsc::channel(config.event_buffer.max(1));
        let (writer, reader) = match kind {
            TransportKind::Websocket => {
                let url = ws_url(&config.base_url)?;
                let (stream, _) = connect_async(url.as_str()).await?;
                let (sink, stream) = stream.split();
                (Writer::Websocket(sink), tokio::spawn(read_websocket(stream, tx)))
            }
            TransportKind::Polling => {
                let http = reqwest::Client::builder()
                    .connect_timeout(config.connect_timeout)
                    .build()?;
                let opened: OpenResponse =
                    read_json(http.post(api_url(&config.base_url, &["poll"])?).send().await?).await?;
                let session_url = api_url(&config.base_url, &["poll", &opened.connection_id])?;
                let reader = tokio::spawn(read_polling(http.clone(), session_url.clone(), config.poll_wait, tx));
                (Writer::Polling { http, session_url }, reader)
            }
        };

        // On any early return `inbound` drops and the reader winds down.
        let connection_id = match inbound.recv().await {
            Some(ServerEvent::Connected(Connected { connection_id, .. })) => connection_id,
            Some(other) => return Err(ClientError::Handshake(other.name())),
            None => return Err(ClientError::Closed),
        };
        Ok(Self { kind, connection_id, inbound, writer, reader })
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<(), ClientError> {
        let text = events::encode(event)?;
        match &mut self.writer {
            Writer::Websocket(sink) => sink.send(Message::text(text)).await?,
            Writer::Polling { http, session_url } => {
                let response = http.post(session_url.clone()).body(text).send().await?;
                let status = response.status();
                if status == reqwest::StatusCode::BAD_REQUEST {
                    // The relay rejected this one event; the session is fine.
                    warn!(event = event.name(), report_id = event.report_id(), "channel: relay rejected event");
                } else if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(rejection(status.as_u16(), &body));
                }
            }
        }
        debug!(transport = %self.kind, event = event.name(), report_id = event.report_id(), "channel: sent");
        Ok(())
    }

    async fn close(mut self) {
        match &mut self.writer {
            Writer::Websocket(sink) => {
                if let Err(err) = sink.close().await {
                    debug!(error = %err, "channel: websocket close failed");
                }
            }
            Writer::Polling { http, session_url } => {
                self.reader.abort();
                release_poll_session(http, session_url.clone()).await;
            }
        }
    }
}

async fn read_websocket(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<ServerEvent>) {
    loop {
        let message = tokio::select! {
            () = tx.closed() => break,
            message = stream.next() => message,
        };
        let Some(message) = message else {
            break;
        };
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(error = %err, "channel: websocket read failed");
                break;
            }
        };
        match events::decode::<ServerEvent>(text.as_str()) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!(error = %err, "channel: undecodable server event"),
        }
    }
}

async fn read_polling(http: reqwest::Client, session_url: Url, wait: Duration, tx: mpsc::Sender<ServerEvent>) {
    let mut poll_url = session_url.clone();
    let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
    poll_url.query_pairs_mut().append_pair("waitMs", &wait_ms.to_string());

    'poll: loop {
        let batch = tokio::select! {
            () = tx.closed() => break,
            batch = next_batch(&http, &poll_url, wait) => batch,
        };
        let Some(batch) = batch else {
            return;
        };
        for event in batch {
            if tx.send(event).await.is_err() {
                break 'poll;
            }
        }
    }
    debug!(%session_url, "channel: poll reader abandoned");
    release_poll_session(&http, session_url).await;
}

/// One long-poll round trip. `None` means the session is gone.
async fn next_batch(http: &reqwest::Client, poll_url: &Url, wait: Duration) -> Option<Vec<ServerEvent>> {
    let response = match http.get(poll_url.clone()).timeout(wait + POLL_REQUEST_GRACE).send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(error = %err, "channel: poll request failed");
            return None;
        }
    };
    match read_json(response).await {
        Ok(batch) => Some(batch),
        Err(err) => {
            debug!(error = %err, "channel: poll session ended");
            None
        }
    }
}

async fn release_poll_session(http: &reqwest::Client, session_url: Url) {
    if let Err(err) = http.delete(session_url).send().await {
        debug!(error = %err, "channel: poll session close failed");
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
