//! Statistical unit persistence
//!
//! The processor only needs four operations on the registry, expressed by
//! [`UnitStore`]. [`PgUnitStore`] keeps each unit as a JSON snapshot keyed by
//! `(unit_type, stat_id)`.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::is_unique_violation;
use crate::ingest::units::{ParsedUnit, UnitKind};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to serialize unit: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unit has no business identifier")]
    MissingBusinessId,

    #[error("{kind} '{stat_id}' already exists")]
    Duplicate { kind: UnitKind, stat_id: String },

    #[error("{kind} '{stat_id}' not found")]
    NotFound { kind: UnitKind, stat_id: String },
}

#[async_trait]
pub trait UnitStore: Send + Sync {
    async fn exists(&self, kind: UnitKind, stat_id: &str) -> Result<bool, StoreError>;

    async fn load(&self, kind: UnitKind, stat_id: &str) -> Result<Option<ParsedUnit>, StoreError>;

    async fn create(&self, unit: &ParsedUnit, data_source: &str) -> Result<(), StoreError>;

    async fn update(&self, unit: &ParsedUnit, data_source: &str) -> Result<(), StoreError>;
}

/// Postgres-backed registry
#[derive(Clone)]
pub struct PgUnitStore {
    pool: PgPool,
}

impl PgUnitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitStore for PgUnitStore {
    async fn exists(&self, kind: UnitKind, stat_id: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM statistical_units WHERE unit_type = $1 AND stat_id = $2)",
        )
        .bind(kind.as_str())
        .bind(stat_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn load(&self, kind: UnitKind, stat_id: &str) -> Result<Option<ParsedUnit>, StoreError> {
        let data: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT data FROM statistical_units WHERE unit_type = $1 AND stat_id = $2",
        )
        .bind(kind.as_str())
        .bind(stat_id)
        .fetch_optional(&self.pool)
        .await?;

        data.map(serde_json::from_value).transpose().map_err(Into::into)
    }

    #[tracing::instrument(skip(self, unit), fields(kind = %unit.kind()))]
    async fn create(&self, unit: &ParsedUnit, data_source: &str) -> Result<(), StoreError> {
        let stat_id = unit.business_id().ok_or(StoreError::MissingBusinessId)?;
        let data = serde_json::to_value(unit)?;

        let result = sqlx::query(
            r#"
            INSERT INTO statistical_units (unit_type, stat_id, name, data, data_source)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(unit.kind().as_str())
        .bind(stat_id)
        .bind(unit.name())
        .bind(&data)
        .bind(data_source)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
                kind: unit.kind(),
                stat_id: stat_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self, unit), fields(kind = %unit.kind()))]
    async fn update(&self, unit: &ParsedUnit, data_source: &str) -> Result<(), StoreError> {
        let stat_id = unit.business_id().ok_or(StoreError::MissingBusinessId)?;
        let data = serde_json::to_value(unit)?;

        let result = sqlx::query(
            r#"
            UPDATE statistical_units
            SET name = $3, data = $4, data_source = $5, updated_at = NOW()
            WHERE unit_type = $1 AND stat_id = $2
            "#,
        )
        .bind(unit.kind().as_str())
        .bind(stat_id)
        .bind(unit.name())
        .bind(&data)
        .bind(data_source)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: unit.kind(),
                stat_id: stat_id.to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory store that records every write, for tests
#[cfg(test)]
#[derive(Default)]
pub struct RecordingStore {
    units: std::sync::Mutex<std::collections::HashMap<(UnitKind, String), ParsedUnit>>,
    writes: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl RecordingStore {
    pub fn seed(&self, unit: &ParsedUnit) {
        if let Some(id) = unit.business_id() {
            self.units
                .lock()
                .unwrap()
                .insert((unit.kind(), id.to_string()), unit.clone());
        }
    }

    /// `(operation, stat id)` of every write so far
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().unwrap().clone()
    }

    fn record(&self, op: &str, unit: &ParsedUnit) -> Result<(), StoreError> {
        let id = unit.business_id().ok_or(StoreError::MissingBusinessId)?;
        self.writes
            .lock()
            .unwrap()
            .push((op.to_string(), id.to_string()));
        self.seed(unit);
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl UnitStore for RecordingStore {
    async fn exists(&self, kind: UnitKind, stat_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .units
            .lock()
            .unwrap()
            .contains_key(&(kind, stat_id.to_string())))
    }

    async fn load(&self, kind: UnitKind, stat_id: &str) -> Result<Option<ParsedUnit>, StoreError> {
        Ok(self
            .units
            .lock()
            .unwrap()
            .get(&(kind, stat_id.to_string()))
            .cloned())
    }

    async fn create(&self, unit: &ParsedUnit, _data_source: &str) -> Result<(), StoreError> {
        self.record("create", unit)
    }

    async fn update(&self, unit: &ParsedUnit, _data_source: &str) -> Result<(), StoreError> {
        self.record("update", unit)
    }
}
