//! Core records of the import pipeline
//!
//! Enumerations are stored as snake_case text columns; the `*Row` structs
//! mirror the tables and convert into the typed records with `TryFrom`.

use chrono::{DateTime, Utc};
use registry_common::types::ImportJobStatus;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::str::FromStr;
use uuid::Uuid;

use super::units::UnitKind;

/// Error raised when a stored enumeration value is not recognised
#[derive(Debug, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Trust tier of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    NotTrusted,
    Ok,
    Trusted,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::NotTrusted => "not_trusted",
            Priority::Ok => "ok",
            Priority::Trusted => "trusted",
        }
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_trusted" => Ok(Priority::NotTrusted),
            "ok" => Ok(Priority::Ok),
            "trusted" => Ok(Priority::Trusted),
            other => Err(UnknownVariant::new("priority", other)),
        }
    }
}

/// Operations a data source may perform on the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedOperations {
    Create,
    Alter,
    CreateAndAlter,
}

impl AllowedOperations {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllowedOperations::Create => "create",
            AllowedOperations::Alter => "alter",
            AllowedOperations::CreateAndAlter => "create_and_alter",
        }
    }

    pub fn can_create(&self) -> bool {
        matches!(self, AllowedOperations::Create | AllowedOperations::CreateAndAlter)
    }

    pub fn can_alter(&self) -> bool {
        matches!(self, AllowedOperations::Alter | AllowedOperations::CreateAndAlter)
    }
}

impl FromStr for AllowedOperations {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AllowedOperations::Create),
            "alter" => Ok(AllowedOperations::Alter),
            "create_and_alter" => Ok(AllowedOperations::CreateAndAlter),
            other => Err(UnknownVariant::new("allowed operations", other)),
        }
    }
}

/// What the rows of an upload describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadType {
    /// Complete statistical units, analyzed before they are written
    StatUnits,
    /// Activity rows for existing units, written without analysis
    Activities,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadType::StatUnits => "stat_units",
            UploadType::Activities => "activities",
        }
    }
}

impl FromStr for UploadType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stat_units" => Ok(UploadType::StatUnits),
            "activities" => Ok(UploadType::Activities),
            other => Err(UnknownVariant::new("upload type", other)),
        }
    }
}

/// One `(source key, target path)` pair of a data source mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMapping {
    pub source: String,
    pub target: String,
}

impl VariableMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Configured external provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub allowed_operations: AllowedOperations,
    pub attributes_to_check: Vec<String>,
    pub variables_mapping: Vec<VariableMapping>,
    pub csv_delimiter: String,
    pub csv_skip_count: i32,
    pub upload_type: UploadType,
    pub stat_unit_type: UnitKind,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSource {
    /// Delimiter byte for CSV readers; anything but a single ASCII byte falls back to a comma
    pub fn delimiter_byte(&self) -> u8 {
        match self.csv_delimiter.as_bytes() {
            [byte] if byte.is_ascii() => *byte,
            _ => b',',
        }
    }
}

/// `data_sources` table row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DataSourceRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub priority: String,
    pub allowed_operations: String,
    pub attributes_to_check: Vec<String>,
    pub variables_mapping: Json<Vec<VariableMapping>>,
    pub csv_delimiter: String,
    pub csv_skip_count: i32,
    pub upload_type: String,
    pub stat_unit_type: String,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching [`DataSourceRow`]
pub const DATA_SOURCE_COLUMNS: &str = "id, name, description, priority, allowed_operations, \
     attributes_to_check, variables_mapping, csv_delimiter, csv_skip_count, upload_type, \
     stat_unit_type, user_id, created_at, updated_at";

impl TryFrom<DataSourceRow> for DataSource {
    type Error = UnknownVariant;

    fn try_from(row: DataSourceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            description: row.description,
            priority: row.priority.parse()?,
            allowed_operations: row.allowed_operations.parse()?,
            attributes_to_check: row.attributes_to_check,
            variables_mapping: row.variables_mapping.0,
            csv_delimiter: row.csv_delimiter,
            csv_skip_count: row.csv_skip_count,
            upload_type: row.upload_type.parse()?,
            stat_unit_type: row.stat_unit_type.parse()?,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Queue item: one bulk upload processed row by row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: i64,
    pub slug: String,
    pub description: Option<String>,
    pub data_source_id: Uuid,
    pub user_id: Option<Uuid>,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub upload_table_name: Option<String>,
    pub upload_columns: Option<Vec<String>>,
    pub skip_lines_count: i32,
    pub status: ImportJobStatus,
    pub upload_completed_pct: i16,
    pub rows_processed: i64,
    pub rows_failed: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_import_date: Option<DateTime<Utc>>,
    pub end_import_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// `import_jobs` table row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImportJobRow {
    pub id: i64,
    pub slug: String,
    pub description: Option<String>,
    pub data_source_id: Uuid,
    pub user_id: Option<Uuid>,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub upload_table_name: Option<String>,
    pub upload_columns: Option<Vec<String>>,
    pub skip_lines_count: i32,
    pub status: String,
    pub upload_completed_pct: i16,
    pub rows_processed: i64,
    pub rows_failed: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_import_date: Option<DateTime<Utc>>,
    pub end_import_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching [`ImportJobRow`]
pub const IMPORT_JOB_COLUMNS: &str = "id, slug, description, data_source_id, user_id, \
     file_name, file_path, upload_table_name, upload_columns, skip_lines_count, status, \
     upload_completed_pct, rows_processed, rows_failed, note, created_at, start_import_date, \
     end_import_date, updated_at";

impl TryFrom<ImportJobRow> for ImportJob {
    type Error = registry_common::RegistryError;

    fn try_from(row: ImportJobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            slug: row.slug,
            description: row.description,
            data_source_id: row.data_source_id,
            user_id: row.user_id,
            file_name: row.file_name,
            file_path: row.file_path,
            upload_table_name: row.upload_table_name,
            upload_columns: row.upload_columns,
            skip_lines_count: row.skip_lines_count,
            status: row.status.parse()?,
            upload_completed_pct: row.upload_completed_pct,
            rows_processed: row.rows_processed,
            rows_failed: row.rows_failed,
            note: row.note,
            created_at: row.created_at,
            start_import_date: row.start_import_date,
            end_import_date: row.end_import_date,
            updated_at: row.updated_at,
        })
    }
}

/// Outcome of one processed row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Done,
    Warning,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Done => "done",
            LogStatus::Warning => "warning",
            LogStatus::Error => "error",
        }
    }

    /// Whether the row counts against a fully successful load
    pub fn is_failure(&self) -> bool {
        !matches!(self, LogStatus::Done)
    }
}

impl FromStr for LogStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "done" => Ok(LogStatus::Done),
            "warning" => Ok(LogStatus::Warning),
            "error" => Ok(LogStatus::Error),
            other => Err(UnknownVariant::new("log status", other)),
        }
    }
}

/// Write-once audit record of one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UploadLogEntry {
    pub id: i64,
    pub import_job_id: i64,
    pub target_stat_id: Option<String>,
    pub stat_unit_name: Option<String>,
    pub serialized_raw: serde_json::Value,
    pub serialized_unit: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: String,
    pub note: Option<String>,
    pub errors: Option<serde_json::Value>,
    pub summary: Option<serde_json::Value>,
}

/// One input row: source keys and raw values in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// First value recorded under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when every value is empty or whitespace
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.trim().is_empty())
    }

    /// Audit snapshot as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
