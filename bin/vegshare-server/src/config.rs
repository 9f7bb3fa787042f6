//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

/// Which transport carries action messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// In-process channel. Only an inline worker can consume it.
    Memory,
    /// NATS JetStream.
    Nats,
}

impl std::str::FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(QueueKind::Memory),
            "nats" => Ok(QueueKind::Nats),
            other => Err(format!("unknown queue backend '{other}'")),
        }
    }
}

/// Runtime configuration for vegshare-server.
///
/// Every field has a default so the server starts with no environment set:
/// a local SQLite file, an in-memory queue and an inline worker.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://vegshare.db"`).
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    pub queue: QueueKind,

    pub nats_url: String,

    /// Subject action messages are published on.
    pub queue_subject: String,

    /// Durable consumer name used by the inline worker.
    pub consumer_name: String,

    /// Run the queue consumer inside the server process.
    pub inline_worker: bool,

    /// Duration of the simulated unit of work in the inline worker.
    pub work_duration_ms: u64,

    /// Upper bound for any single storage call, including pool acquisition.
    pub storage_timeout_ms: u64,

    /// When set, administrative routes require `Authorization: Bearer <token>`.
    pub admin_token: Option<String>,

    /// Comma-separated CORS origins; wildcard when unset.
    pub cors_allowed_origins: Option<String>,

    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("VEGSHARE_BIND", "0.0.0.0:3000"),
            database_url: env_or("VEGSHARE_DATABASE_URL", "sqlite://vegshare.db"),
            log_level: env_or("VEGSHARE_LOG", "info"),
            log_json: parse_bool("VEGSHARE_LOG_JSON", false),
            queue: parse_env("VEGSHARE_QUEUE", QueueKind::Memory),
            nats_url: env_or("VEGSHARE_NATS_URL", "nats://127.0.0.1:4222"),
            queue_subject: env_or("VEGSHARE_QUEUE_SUBJECT", vegshare_core::queue::DEFAULT_SUBJECT),
            consumer_name: env_or("VEGSHARE_CONSUMER_NAME", "vegshare_worker"),
            inline_worker: parse_bool("VEGSHARE_INLINE_WORKER", true),
            work_duration_ms: parse_env("VEGSHARE_WORK_DURATION_MS", 5_000),
            storage_timeout_ms: parse_env("VEGSHARE_STORAGE_TIMEOUT_MS", 5_000),
            admin_token: std::env::var("VEGSHARE_ADMIN_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            cors_allowed_origins: std::env::var("VEGSHARE_CORS_ORIGINS").ok(),
            enable_swagger: parse_bool("VEGSHARE_ENABLE_SWAGGER", true),
        }
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn work_duration(&self) -> Duration {
        Duration::from_millis(self.work_duration_ms)
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
