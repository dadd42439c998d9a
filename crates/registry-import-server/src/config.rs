//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ingest::analyzer::AnalysisConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/registry";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Import Pipeline Constants
// ============================================================================

/// Default number of concurrent job workers.
pub const DEFAULT_IMPORT_WORKERS: usize = 2;

/// Default delay between dequeue attempts on an empty queue.
pub const DEFAULT_IMPORT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default period of the stalled-job reclaim task.
pub const DEFAULT_IMPORT_RECLAIM_INTERVAL_SECS: u64 = 60;

/// Default age after which a loading job counts as stalled (1 hour).
pub const DEFAULT_IMPORT_RECLAIM_TIMEOUT_SECS: u64 = 3_600;

// ============================================================================
// Notification Constants
// ============================================================================

/// Default heartbeat period for status streams.
pub const DEFAULT_SSE_HEARTBEAT_SECS: u64 = 10;

/// Default reconnect interval advertised to clients.
pub const DEFAULT_SSE_RETRY_MS: u64 = 3_000;

/// Default capacity of each connection's outbox.
pub const DEFAULT_SSE_OUTBOX_CAPACITY: usize = 64;

/// Default number of consecutive failed sends before a connection is closed.
pub const DEFAULT_SSE_MAX_FAILED_SENDS: u32 = 3;

/// Default delay before the change listener reconnects.
pub const DEFAULT_LISTENER_RECONNECT_SECS: u64 = 5;

/// Default debounce window for worker status announcements.
pub const DEFAULT_WORKER_STATUS_DEBOUNCE_MS: u64 = 500;

// ============================================================================
// Upload Constants
// ============================================================================

/// Default number of leading bytes that must contain a line break.
pub const DEFAULT_UPLOAD_NEWLINE_PROBE_BYTES: usize = 10 * 1024;

/// Default progress granularity in percent.
pub const DEFAULT_UPLOAD_PROGRESS_STEP_PCT: u8 = 5;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub worker: WorkerConfig,
    pub notifications: NotificationConfig,
    pub upload: UploadConfig,
    pub analysis: AnalysisConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Background job processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub reclaim_interval_secs: u64,
    pub reclaim_timeout_secs: u64,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    pub fn reclaim_timeout(&self) -> Duration {
        Duration::from_secs(self.reclaim_timeout_secs)
    }
}

/// Status stream and change listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub heartbeat_secs: u64,
    pub retry_ms: u64,
    pub outbox_capacity: usize,
    pub max_failed_sends: u32,
    pub listener_reconnect_secs: u64,
    pub worker_status_debounce_ms: u64,
}

impl NotificationConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    pub fn listener_reconnect(&self) -> Duration {
        Duration::from_secs(self.listener_reconnect_secs)
    }

    pub fn worker_status_debounce(&self) -> Duration {
        Duration::from_millis(self.worker_status_debounce_ms)
    }
}

/// Upload gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub newline_probe_bytes: usize,
    pub progress_step_pct: u8,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let analysis = match std::env::var("ANALYSIS_CONFIG") {
            Ok(path) => AnalysisConfig::from_file(&path)?,
            Err(_) => AnalysisConfig::default(),
        };

        let config = Config {
            server: ServerConfig {
                host: std::env::var("REGISTRY_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("REGISTRY_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or(
                    "REGISTRY_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true),
            },
            worker: WorkerConfig {
                enabled: env_or("IMPORT_ENABLED", true),
                workers: env_or("IMPORT_WORKERS", DEFAULT_IMPORT_WORKERS),
                poll_interval_ms: env_or("IMPORT_POLL_INTERVAL_MS", DEFAULT_IMPORT_POLL_INTERVAL_MS),
                reclaim_interval_secs: env_or(
                    "IMPORT_RECLAIM_INTERVAL_SECS",
                    DEFAULT_IMPORT_RECLAIM_INTERVAL_SECS,
                ),
                reclaim_timeout_secs: env_or(
                    "IMPORT_RECLAIM_TIMEOUT_SECS",
                    DEFAULT_IMPORT_RECLAIM_TIMEOUT_SECS,
                ),
            },
            notifications: NotificationConfig {
                heartbeat_secs: env_or("SSE_HEARTBEAT_SECS", DEFAULT_SSE_HEARTBEAT_SECS),
                retry_ms: env_or("SSE_RETRY_MS", DEFAULT_SSE_RETRY_MS),
                outbox_capacity: env_or("SSE_OUTBOX_CAPACITY", DEFAULT_SSE_OUTBOX_CAPACITY),
                max_failed_sends: env_or("SSE_MAX_FAILED_SENDS", DEFAULT_SSE_MAX_FAILED_SENDS),
                listener_reconnect_secs: env_or(
                    "LISTENER_RECONNECT_SECS",
                    DEFAULT_LISTENER_RECONNECT_SECS,
                ),
                worker_status_debounce_ms: env_or(
                    "WORKER_STATUS_DEBOUNCE_MS",
                    DEFAULT_WORKER_STATUS_DEBOUNCE_MS,
                ),
            },
            upload: UploadConfig {
                newline_probe_bytes: env_or(
                    "UPLOAD_NEWLINE_PROBE_BYTES",
                    DEFAULT_UPLOAD_NEWLINE_PROBE_BYTES,
                ),
                progress_step_pct: env_or(
                    "UPLOAD_PROGRESS_STEP_PCT",
                    DEFAULT_UPLOAD_PROGRESS_STEP_PCT,
                ),
            },
            analysis,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        // Each worker holds a connection for the whole job, the gateway needs
        // one for the load transaction and one for progress updates.
        if self.worker.enabled && self.worker.workers as u32 + 2 > self.database.max_connections {
            anyhow::bail!(
                "IMPORT_WORKERS ({}) leaves no database connections for the API (max_connections = {})",
                self.worker.workers,
                self.database.max_connections
            );
        }

        if self.worker.reclaim_timeout_secs == 0 {
            anyhow::bail!("Reclaim timeout must be greater than 0");
        }

        if self.notifications.outbox_capacity == 0 {
            anyhow::bail!("SSE outbox capacity must be greater than 0");
        }

        if self.notifications.max_failed_sends == 0 {
            anyhow::bail!("SSE max failed sends must be greater than 0");
        }

        if self.upload.progress_step_pct == 0 || self.upload.progress_step_pct > 100 {
            anyhow::bail!("Upload progress step must be between 1 and 100");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            worker: WorkerConfig::default(),
            notifications: NotificationConfig::default(),
            upload: UploadConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: DEFAULT_IMPORT_WORKERS,
            poll_interval_ms: DEFAULT_IMPORT_POLL_INTERVAL_MS,
            reclaim_interval_secs: DEFAULT_IMPORT_RECLAIM_INTERVAL_SECS,
            reclaim_timeout_secs: DEFAULT_IMPORT_RECLAIM_TIMEOUT_SECS,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: DEFAULT_SSE_HEARTBEAT_SECS,
            retry_ms: DEFAULT_SSE_RETRY_MS,
            outbox_capacity: DEFAULT_SSE_OUTBOX_CAPACITY,
            max_failed_sends: DEFAULT_SSE_MAX_FAILED_SENDS,
            listener_reconnect_secs: DEFAULT_LISTENER_RECONNECT_SECS,
            worker_status_debounce_ms: DEFAULT_WORKER_STATUS_DEBOUNCE_MS,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            newline_probe_bytes: DEFAULT_UPLOAD_NEWLINE_PROBE_BYTES,
            progress_step_pct: DEFAULT_UPLOAD_PROGRESS_STEP_PCT,
        }
    }
}
