//! vegshare-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Connect the action queue and, if enabled, start the inline consumer.
//! 5. Build the Axum router and serve HTTP with graceful shutdown.

mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vegshare_core::entities::SqliteStore;
use vegshare_core::queue::{MemoryQueue, NatsQueue, Subscription};
use vegshare_core::worker::{QueueConsumer, SimulatedExecutor};

use crate::config::{Config, QueueKind};
use crate::state::{AppState, QueueBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: VEGSHARE_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "vegshare-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = if SqliteStore::is_in_memory(&cfg.database_url) {
        warn!("using a private in-memory database; data is lost on exit");
        SqliteStore::in_memory().await?
    } else {
        SqliteStore::connect(&cfg.database_url, cfg.storage_timeout()).await?
    };
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Action queue and inline consumer ────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (queue, worker) = match cfg.queue {
        QueueKind::Memory => {
            let queue = MemoryQueue::new();
            let worker = if cfg.inline_worker {
                Some(spawn_consumer(&cfg, store.clone(), shutdown_rx, queue.subscribe()))
            } else {
                warn!("memory queue without inline worker; automatic actions will not run");
                None
            };
            (QueueBackend::Memory(queue), worker)
        }
        QueueKind::Nats => {
            let queue = NatsQueue::connect(&cfg.nats_url, &cfg.queue_subject).await?;
            let worker = if cfg.inline_worker {
                let subscription = queue.subscribe(&cfg.consumer_name).await?;
                Some(spawn_consumer(&cfg, store.clone(), shutdown_rx, subscription))
            } else {
                None
            };
            (QueueBackend::Nats(queue), worker)
        }
    };
    info!(queue = ?cfg.queue, inline_worker = worker.is_some(), "action queue ready");

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let state = Arc::new(AppState::new(cfg, store, queue));
    let app = routes::build(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Wakes the inline consumer; in-flight work is requeued.
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = worker {
        if let Err(e) = handle.await {
            warn!(error = %e, "inline consumer task ended abnormally");
        }
    }

    info!("vegshare-server stopped");
    Ok(())
}

fn spawn_consumer<Sub>(
    cfg: &Config,
    store: SqliteStore,
    shutdown: watch::Receiver<bool>,
    subscription: Sub,
) -> JoinHandle<()>
where
    Sub: Subscription + 'static,
    Sub::Delivery: 'static,
{
    let consumer = QueueConsumer::new(store, SimulatedExecutor::new(cfg.work_duration()), shutdown)
        .with_storage_timeout(cfg.storage_timeout());
    tokio::spawn(async move { consumer.run(subscription).await })
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
