mod config;
mod error;
mod handlers;
mod hub;
mod metrics;
mod models;
mod session;
mod state;
mod store;
mod visit_log;

use anyhow::Context;
use clap::Parser; // for cli
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use config::Args;
use hub::BroadcastHub;
use session::SessionTracker;
use state::AppState;
use store::{MemoryStore, RecordStore, SqliteStore};
use visit_log::VisitLog;

// this is main async function with tokio
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    // parse cli arguments
    let args = Args::parse();

    // no store, no server
    let store: Arc<dyn RecordStore> = if args.memory {
        tracing::warn!("Using in-memory visitor log; entries are lost on restart");
        Arc::new(MemoryStore::new())
    } else {
        let db = SqliteStore::open(&args.database)
            .with_context(|| format!("opening visitor log at {}", args.database.display()))?;
        tracing::info!("DB connected: {}", args.database.display());
        Arc::new(db)
    };

    let log = Arc::new(VisitLog::new(store, args.capacity));
    log.restore().await.context("reading visitor log")?;

    // creating shared state
    let state = AppState {
        tracker: SessionTracker::new(log, Arc::new(BroadcastHub::new(args.send_queue))),
        started_at: chrono::Utc::now(),
    };

    let app = handlers::router(state, &args.static_dir);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!("Server listening at {}", args.port);
    tracing::info!("Serving static files from {}", args.static_dir.display());
    tracing::info!("Visitor log capacity: {}", args.capacity);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
