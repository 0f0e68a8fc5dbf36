use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use events::{ErrorCode, ReportStatus, VoteView};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use viewer::config::transports_for;
use viewer::{
    Channel, ChannelConfig, ClientError, CommentThread, ConnectionState, EventSink, HttpStore, ReconcileConfig,
    ReconcileError, StatusBoard, StoreApi, VoteToggle, follow,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event stream closed")]
    StreamClosed,
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            Self::Client(err) => err.error_code(),
            Self::Reconcile(err) => err.error_code(),
            Self::Json(_) => "E_OUTPUT",
            Self::StreamClosed => "E_CHANNEL_CLOSED",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "civic-viewer", about = "Watch civic reports live and act on them")]
struct Cli {
    #[arg(long, env = "CIVIC_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "CIVIC_SESSION_TOKEN")]
    session_token: Option<String>,

    #[arg(long, env = "CIVIC_TRANSPORT", value_enum, default_value_t = Transport::Auto)]
    transport: Transport,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    Auto,
    Websocket,
    Polling,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Websocket => "websocket",
            Self::Polling => "polling",
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a report's room and print every event until Ctrl-C, then the
    /// reconciled thread and vote state.
    Watch {
        report_id: String,
        /// Offline time before a reconnecting notice is printed.
        #[arg(long, default_value_t = 3_000)]
        banner_grace_ms: u64,
    },
    /// Post a comment.
    Comment { report_id: String, body: String },
    /// Delete every comment on a report (admin).
    Clear { report_id: String },
    /// Toggle your vote.
    Vote { report_id: String },
    /// Show a report's status, or set it (admin).
    Status {
        report_id: String,
        #[arg(value_parser = ReportStatus::from_str)]
        status: Option<ReportStatus>,
    },
}

#[derive(Serialize)]
struct Cleared {
    cleared: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchSummary {
    report_id: String,
    comments: usize,
    votes: VoteView,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error[{}]: {err}", err.code());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ChannelConfig::from_env();
    config.base_url = cli.base_url.trim_end_matches('/').to_owned();
    if let Some(transports) = transports_for(cli.transport.as_str()) {
        config.transports = transports;
    }

    let store: Arc<dyn StoreApi> = Arc::new(HttpStore::new(&cli.base_url, cli.session_token)?);
    let channel = Channel::new(config);
    let sink: Arc<dyn EventSink> = Arc::new(channel.clone());
    let reconcile = ReconcileConfig::from_env();

    let result = execute(cli.command, &channel, store, sink, reconcile).await;
    // Flushes any broadcast the command queued.
    channel.shutdown().await;
    result
}

async fn execute(
    command: Command,
    channel: &Channel,
    store: Arc<dyn StoreApi>,
    sink: Arc<dyn EventSink>,
    reconcile: ReconcileConfig,
) -> Result<(), CliError> {
    match command {
        Command::Watch { report_id, banner_grace_ms } => {
            let thread = CommentThread::new(report_id.clone(), store.clone(), sink.clone(), reconcile);
            let votes = VoteToggle::new(report_id, store, sink, reconcile);
            watch(channel, &thread, &votes, Duration::from_millis(banner_grace_ms)).await
        }
        Command::Comment { report_id, body } => {
            let thread = CommentThread::new(report_id, store, sink, reconcile);
            print_json(&thread.submit(&body).await?)
        }
        Command::Clear { report_id } => {
            let thread = CommentThread::new(report_id, store, sink, reconcile);
            print_json(&Cleared { cleared: thread.clear().await? })
        }
        Command::Vote { report_id } => {
            let votes = VoteToggle::new(report_id, store, sink, reconcile);
            votes.load().await?;
            print_json(&votes.toggle().await?)
        }
        Command::Status { report_id, status } => {
            let board = StatusBoard::new(store, sink, reconcile);
            let current = match status {
                Some(status) => board.change(&report_id, status).await?,
                None => board.load(&report_id).await?,
            };
            println!("{report_id}\t{current}");
            Ok(())
        }
    }
}

async fn watch(channel: &Channel, thread: &CommentThread, votes: &VoteToggle, grace: Duration) -> Result<(), CliError> {
    // Subscribe before loading so live events during the load are merged.
    let followers = [follow(thread.clone(), channel.subscribe()), follow(votes.clone(), channel.subscribe())];
    let mut inbound = channel.subscribe();
    let mut status = channel.status();
    let _view = channel.view(thread.report_id());
    thread.load().await?;
    votes.load().await?;

    let mut banner_check = tokio::time::interval(Duration::from_millis(500));
    let mut banner_shown = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                for follower in &followers {
                    follower.abort();
                }
                return print_json(&WatchSummary {
                    report_id: thread.report_id().to_owned(),
                    comments: thread.comments().len(),
                    votes: votes.view(),
                });
            }
            event = inbound.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "watch: output fell behind"),
                Err(RecvError::Closed) => return Err(CliError::StreamClosed),
            },
            Ok(()) = status.changed() => {
                if let ConnectionState::Connected(transport) = status.borrow_and_update().state {
                    eprintln!("connected via {transport}");
                    banner_shown = false;
                }
            },
            _ = banner_check.tick() => {
                let show = status.borrow().show_banner(grace, Instant::now());
                if show && !banner_shown {
                    eprintln!("connection lost; reconnecting...");
                }
                banner_shown = show;
            },
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
