//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the store, the handle to the dispatcher loop that owns room
//! membership, the long-poll session map, and the server config. Clone is
//! required by Axum; every field is a handle or Arc-wrapped.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::services::dispatch::{DispatcherHandle, spawn_dispatcher};
use crate::services::poll::PollSessions;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub dispatcher: DispatcherHandle,
    pub polls: PollSessions,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Build the state and spawn the dispatcher loop. Must run inside a
    /// tokio runtime.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServerConfig) -> Self {
        let (dispatcher, _task) = spawn_dispatcher();
        let polls = PollSessions::new(dispatcher.clone(), config.client_channel_capacity);
        Self { store, dispatcher, polls, config: Arc::new(config) }
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::store::MemoryStore;

    /// State over the demo in-memory store and default config.
    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(Arc::new(MemoryStore::with_demo_data()), ServerConfig::default())
    }

    /// Bind the full router on an ephemeral local port and return its address.
    pub async fn spawn_server(state: AppState) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let app = crate::routes::app(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server failed");
        });
        addr
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
