//! Common test utilities for registry import integration tests
//!
//! Spins up a PostgreSQL container with migrations applied and offers
//! helpers to seed users, tokens, data sources and jobs.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestDataHelper, TestPostgres};
//!
//! #[tokio::test]
//! async fn test_with_postgres() {
//!     let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
//!     let data = TestDataHelper::new(pg.pool());
//!     let user = data.create_user("alice").await.unwrap();
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};
use uuid::Uuid;

use registry_import::ingest::types::VariableMapping;

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL test container wrapper with migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    /// Start a new PostgreSQL container with migrations applied
    pub async fn start() -> Result<Self> {
        Self::start_with_options(PostgresOptions::default()).await
    }

    pub async fn start_with_options(options: PostgresOptions) -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag(&options.version)
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(Duration::from_secs(options.acquire_timeout_secs))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Migrations completed successfully");

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// Configuration options for the PostgreSQL test container
pub struct PostgresOptions {
    /// PostgreSQL version/tag (default: "16-alpine")
    pub version: String,
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            version: "16-alpine".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
        }
    }
}

// ============================================================================
// Test Data Helpers
// ============================================================================

/// Helper for creating test data in the database
pub struct TestDataHelper<'a> {
    pool: &'a PgPool,
}

impl<'a> TestDataHelper<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_user(&self, username: &str) -> Result<Uuid> {
        sqlx::query_scalar("INSERT INTO users (username) VALUES ($1) RETURNING id")
            .bind(username)
            .fetch_one(self.pool)
            .await
            .context("Failed to create user")
    }

    /// Store `token` for `user_id` the way the gateway looks it up
    pub async fn create_token(&self, user_id: Uuid, token: &str) -> Result<()> {
        sqlx::query("INSERT INTO api_tokens (user_id, token_hash) VALUES ($1, $2)")
            .bind(user_id)
            .bind(registry_import::middleware::auth::hash_token(token))
            .execute(self.pool)
            .await
            .context("Failed to create token")?;
        Ok(())
    }

    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        sqlx::query("UPDATE api_tokens SET revoked_at = NOW() WHERE token_hash = $1")
            .bind(registry_import::middleware::auth::hash_token(token))
            .execute(self.pool)
            .await
            .context("Failed to revoke token")?;
        Ok(())
    }

    /// Legal unit source for [`UNITS_HEADER`] files
    pub async fn create_data_source(&self, name: &str, priority: &str) -> Result<Uuid> {
        let mapping = vec![
            VariableMapping::new("id", "StatId"),
            VariableMapping::new("name", "Name"),
            VariableMapping::new("street", "Address.AddressPart1"),
            VariableMapping::new("city", "Address.AddressPart2"),
            VariableMapping::new("activity", "Activities.ActivityCategory.Code"),
            VariableMapping::new("activity_type", "Activities.ActivityType"),
        ];
        sqlx::query_scalar(
            r#"
            INSERT INTO data_sources (name, priority, variables_mapping, stat_unit_type)
            VALUES ($1, $2, $3, 'legal_unit')
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(priority)
        .bind(Json(&mapping))
        .fetch_one(self.pool)
        .await
        .context("Failed to create data source")
    }

    pub async fn create_job(
        &self,
        data_source_id: Uuid,
        user_id: Option<Uuid>,
        slug: &str,
        status: &str,
    ) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            INSERT INTO import_jobs (slug, data_source_id, user_id, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(slug)
        .bind(data_source_id)
        .bind(user_id)
        .bind(status)
        .fetch_one(self.pool)
        .await
        .context("Failed to create import job")
    }

    /// Put a job in `loading` as if it was claimed `secs_ago` seconds ago
    pub async fn mark_loading_since(&self, job_id: i64, secs_ago: f64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'loading',
                start_import_date = NOW() - make_interval(secs => $2)
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(secs_ago)
        .execute(self.pool)
        .await
        .context("Failed to mark job loading")?;
        Ok(())
    }

    pub async fn job_status(&self, job_id: i64) -> Result<String> {
        sqlx::query_scalar("SELECT status FROM import_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(self.pool)
            .await
            .context("Failed to read job status")
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

pub const MULTIPART_BOUNDARY: &str = "registry-test-boundary";

/// Columns understood by [`TestDataHelper::create_data_source`]
pub const UNITS_HEADER: [&str; 6] = ["id", "name", "street", "city", "activity", "activity_type"];

/// Multipart body with an optional `jobSlug` field followed by a `file` field
pub fn multipart_body(slug: Option<&str>, file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(slug) = slug {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"jobSlug\"\r\n\r\n{slug}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: text/csv\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,registry_import=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
