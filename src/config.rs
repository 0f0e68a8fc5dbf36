//! Server configuration from environment variables.
//!
//! Every knob has a default; unparsable values fall back to the default
//! rather than failing start-up.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_POLL_WAIT_MAX_MS: u64 = 25_000;
const DEFAULT_POLL_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_POLL_BATCH_MAX: usize = 64;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Postgres URL. `None` runs the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Outbound queue depth per connection. Events beyond it are dropped.
    pub client_channel_capacity: usize,
    /// Upper bound on how long a long-poll request may wait for an event.
    /// Never more than half of `poll_idle_timeout`, so a waiting session is
    /// not reaped mid-wait.
    pub poll_wait_max: Duration,
    /// Poll sessions with no request for this long are disconnected.
    pub poll_idle_timeout: Duration,
    /// Maximum events returned by one long-poll response.
    pub poll_batch_max: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
            poll_wait_max: Duration::from_millis(DEFAULT_POLL_WAIT_MAX_MS),
            poll_idle_timeout: Duration::from_secs(DEFAULT_POLL_IDLE_TIMEOUT_SECS),
            poll_batch_max: DEFAULT_POLL_BATCH_MAX,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).map(|raw| raw.trim().to_owned());

        let database_url = parse("DATABASE_URL").filter(|url| !url.is_empty());

        let poll_idle_timeout =
            Duration::from_secs(parse_or(parse("POLL_IDLE_TIMEOUT_SECS"), DEFAULT_POLL_IDLE_TIMEOUT_SECS).max(1));
        let poll_wait_max =
            Duration::from_millis(parse_or(parse("POLL_WAIT_MAX_MS"), DEFAULT_POLL_WAIT_MAX_MS)).min(poll_idle_timeout / 2);

        Self {
            port: parse_or(parse("PORT"), DEFAULT_PORT),
            database_url,
            db_max_connections: parse_or(parse("DB_MAX_CONNECTIONS"), DEFAULT_DB_MAX_CONNECTIONS).max(1),
            client_channel_capacity: parse_or(parse("CLIENT_CHANNEL_CAPACITY"), DEFAULT_CLIENT_CHANNEL_CAPACITY).max(1),
            poll_wait_max,
            poll_idle_timeout,
            poll_batch_max: parse_or(parse("POLL_BATCH_MAX"), DEFAULT_POLL_BATCH_MAX).max(1),
        }
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr,
{
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}
