mod config;
mod db;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use config::ServerConfig;
use store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = db::init_pool(database_url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store with demo data");
            Arc::new(MemoryStore::with_demo_data())
        }
    };

    let port = config.port;
    let idle_timeout = config.poll_idle_timeout;
    let state = state::AppState::new(store, config);

    // Spawn idle poll-session reaper.
    let _reaper = services::poll::spawn_reaper(state.polls.clone(), idle_timeout);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "civic-relay listening");
    axum::serve(listener, app).await.expect("server failed");
}
