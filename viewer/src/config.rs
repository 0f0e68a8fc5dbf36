//! Viewer configuration from environment variables.
//!
//! Mirrors the server's approach: every knob has a default and unparsable
//! values fall back to it.

use std::time::Duration;

use events::TransportKind;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;
const DEFAULT_POLL_WAIT_MS: u64 = 20_000;
const DEFAULT_EVENT_BUFFER: usize = 256;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 10_000;

/// Parse a transport preference: `auto`, `websocket` or `polling`.
#[must_use]
pub fn transports_for(choice: &str) -> Option<Vec<TransportKind>> {
    match choice.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(vec![TransportKind::Websocket, TransportKind::Polling]),
        "websocket" | "ws" => Some(vec![TransportKind::Websocket]),
        "polling" | "poll" => Some(vec![TransportKind::Polling]),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// `http(s)://host:port` of the relay.
    pub base_url: String,
    /// Transports tried in order on every connect attempt.
    pub transports: Vec<TransportKind>,
    /// Bound on one transport's connect plus `connected` handshake.
    pub connect_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// How long one long-poll request asks the server to hold.
    pub poll_wait: Duration,
    /// Capacity of the local subscriber fan-out.
    pub event_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            transports: vec![TransportKind::Websocket, TransportKind::Polling],
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            backoff_initial: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            poll_wait: Duration::from_millis(DEFAULT_POLL_WAIT_MS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).map(|raw| raw.trim().to_owned());
        let defaults = Self::default();

        let backoff_initial =
            Duration::from_millis(parse_or(parse("CIVIC_BACKOFF_INITIAL_MS"), DEFAULT_BACKOFF_INITIAL_MS).max(1));
        let backoff_max = Duration::from_millis(parse_or(parse("CIVIC_BACKOFF_MAX_MS"), DEFAULT_BACKOFF_MAX_MS))
            .max(backoff_initial);

        Self {
            base_url: parse("CIVIC_BASE_URL")
                .filter(|url| !url.is_empty())
                .map_or(defaults.base_url, |url| url.trim_end_matches('/').to_owned()),
            transports: parse("CIVIC_TRANSPORT")
                .and_then(|raw| transports_for(&raw))
                .unwrap_or(defaults.transports),
            connect_timeout: Duration::from_millis(parse_or(
                parse("CIVIC_CONNECT_TIMEOUT_MS"),
                DEFAULT_CONNECT_TIMEOUT_MS,
            )),
            backoff_initial,
            backoff_max,
            poll_wait: Duration::from_millis(parse_or(parse("CIVIC_POLL_WAIT_MS"), DEFAULT_POLL_WAIT_MS)),
            event_buffer: parse_or(parse("CIVIC_EVENT_BUFFER"), DEFAULT_EVENT_BUFFER).max(1),
        }
    }
}

/// Settings for reconciler store calls.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    /// After this long an optimistic change is rolled back.
    pub store_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS) }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let store_timeout = std::env::var("CIVIC_STORE_TIMEOUT_MS").ok();
        Self {
            store_timeout: Duration::from_millis(parse_or(
                store_timeout.map(|raw| raw.trim().to_owned()),
                DEFAULT_STORE_TIMEOUT_MS,
            )),
        }
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr,
{
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}
