//! vegshare-worker – standalone consumer for automatic actions.
//!
//! Run one or more of these next to the server when the server itself is
//! started with `VEGSHARE_INLINE_WORKER=false`. Instances sharing a consumer
//! name share one JetStream cursor.
//!
//! Usage:
//!   vegshare-worker --database-url sqlite://vegshare.db --nats-url nats://localhost:4222

use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vegshare_core::entities::SqliteStore;
use vegshare_core::queue::{NatsQueue, DEFAULT_SUBJECT};
use vegshare_core::worker::{QueueConsumer, SimulatedExecutor};

#[derive(Parser, Debug)]
#[command(name = "vegshare-worker")]
#[command(about = "Executes queued automatic plot actions")]
#[command(version)]
struct Args {
    /// SQLite database shared with the server
    #[arg(long, env = "VEGSHARE_DATABASE_URL", default_value = "sqlite://vegshare.db")]
    database_url: String,

    /// NATS server URL
    #[arg(long, env = "VEGSHARE_NATS_URL", default_value = "nats://127.0.0.1:4222")]
    nats_url: String,

    /// Subject actions are published on
    #[arg(long, env = "VEGSHARE_QUEUE_SUBJECT", default_value = DEFAULT_SUBJECT)]
    subject: String,

    /// Durable consumer name
    #[arg(long, env = "VEGSHARE_CONSUMER_NAME", default_value = "vegshare-worker")]
    consumer_name: String,

    /// Simulated duration of one action, in milliseconds
    #[arg(long, env = "VEGSHARE_WORK_DURATION_MS", default_value = "5000")]
    work_duration_ms: u64,

    /// Upper bound on a single storage call, in milliseconds
    #[arg(long, env = "VEGSHARE_STORAGE_TIMEOUT_MS", default_value = "5000")]
    storage_timeout_ms: u64,

    /// Tracing filter used when RUST_LOG is unset
    #[arg(long, env = "VEGSHARE_LOG", default_value = "info")]
    log_level: String,

    /// Emit JSON log lines
    #[arg(long, env = "VEGSHARE_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| args.log_level.parse::<EnvFilter>())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    if let Err(e) = run(args).await {
        error!(error = %e, "worker failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        nats_url = %args.nats_url,
        subject = %args.subject,
        consumer = %args.consumer_name,
        "starting vegshare worker"
    );

    let storage_timeout = Duration::from_millis(args.storage_timeout_ms);
    if SqliteStore::is_in_memory(&args.database_url) {
        warn!("worker is using a private in-memory database; it will not see server operations");
    }
    let store = SqliteStore::connect(&args.database_url, storage_timeout).await?;
    let queue = NatsQueue::connect(&args.nats_url, &args.subject).await?;
    let subscription = queue.subscribe(&args.consumer_name).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = QueueConsumer::new(
        store,
        SimulatedExecutor::new(Duration::from_millis(args.work_duration_ms)),
        shutdown_rx,
    )
    .with_storage_timeout(storage_timeout);
    let mut handle = tokio::spawn(async move { consumer.run(subscription).await });

    let consumer_exited = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut handle => {
            if let Err(e) = result {
                error!(error = %e, "consumer task error");
            }
            true
        }
    };

    if !consumer_exited {
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "consumer task error");
        }
    }

    info!("worker stopped");
    Ok(())
}

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
}
