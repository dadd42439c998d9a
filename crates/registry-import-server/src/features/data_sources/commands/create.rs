//! Create data source command
//!
//! Registers an external provider: its trust tier, the operations it may
//! perform and the ordered mapping from its column names to unit fields.
//! Every mapping target is checked against the field table of the declared
//! unit type, so a bad template is rejected here rather than failing every
//! row of every job later.

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::db::is_unique_violation;
use crate::features::shared::validation::{validate_name, NameValidationError};
use crate::ingest::analyzer::MandatoryFields;
use crate::ingest::mapper::{Mapper, MappingError};
use crate::ingest::types::{
    AllowedOperations, DataSource, DataSourceRow, Priority, UploadType, VariableMapping,
    DATA_SOURCE_COLUMNS,
};
use crate::ingest::units::UnitKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDataSourceCommand {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: Priority,
    #[serde(default = "default_allowed_operations")]
    pub allowed_operations: AllowedOperations,
    #[serde(default)]
    pub attributes_to_check: Vec<String>,
    pub variables_mapping: Vec<VariableMapping>,
    #[serde(default = "default_delimiter")]
    pub csv_delimiter: String,
    #[serde(default)]
    pub csv_skip_count: i32,
    #[serde(default = "default_upload_type")]
    pub upload_type: UploadType,
    pub stat_unit_type: UnitKind,
}

fn default_allowed_operations() -> AllowedOperations {
    AllowedOperations::CreateAndAlter
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_upload_type() -> UploadType {
    UploadType::StatUnits
}

#[derive(Debug, thiserror::Error)]
pub enum CreateDataSourceError {
    #[error("Name validation failed: {0}")]
    NameValidation(#[from] NameValidationError),

    #[error("Invalid mapping: {0}")]
    Mapping(#[from] MappingError),

    #[error("Unknown attribute to check: {0}")]
    UnknownAttribute(String),

    #[error("CSV delimiter must be a single ASCII character, got '{0}'")]
    InvalidDelimiter(String),

    #[error("CSV skip count cannot be negative")]
    NegativeSkipCount,

    #[error("Data source '{0}' already exists")]
    DuplicateName(String),

    #[error("Invalid stored data source: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CreateDataSourceCommand {
    pub fn validate(&self) -> Result<(), CreateDataSourceError> {
        validate_name(&self.name, 255)?;

        Mapper::compile(self.stat_unit_type, &self.variables_mapping)?;

        if let Some(unknown) = self
            .attributes_to_check
            .iter()
            .find(|attribute| !MandatoryFields::is_known(attribute))
        {
            return Err(CreateDataSourceError::UnknownAttribute(unknown.clone()));
        }

        if self.csv_delimiter.len() != 1 || !self.csv_delimiter.is_ascii() {
            return Err(CreateDataSourceError::InvalidDelimiter(
                self.csv_delimiter.clone(),
            ));
        }

        if self.csv_skip_count < 0 {
            return Err(CreateDataSourceError::NegativeSkipCount);
        }

        Ok(())
    }
}

#[tracing::instrument(skip(pool, command), fields(name = %command.name))]
pub async fn handle(
    pool: PgPool,
    command: CreateDataSourceCommand,
) -> Result<DataSource, CreateDataSourceError> {
    command.validate()?;

    let sql = format!(
        r#"
        INSERT INTO data_sources (
            name, description, priority, allowed_operations, attributes_to_check,
            variables_mapping, csv_delimiter, csv_skip_count, upload_type, stat_unit_type
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {DATA_SOURCE_COLUMNS}
        "#
    );

    let row: DataSourceRow = sqlx::query_as(&sql)
        .bind(&command.name)
        .bind(&command.description)
        .bind(command.priority.as_str())
        .bind(command.allowed_operations.as_str())
        .bind(&command.attributes_to_check)
        .bind(Json(&command.variables_mapping))
        .bind(&command.csv_delimiter)
        .bind(command.csv_skip_count)
        .bind(command.upload_type.as_str())
        .bind(command.stat_unit_type.as_str())
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CreateDataSourceError::DuplicateName(command.name.clone())
            } else {
                CreateDataSourceError::Database(e)
            }
        })?;

    let source =
        DataSource::try_from(row).map_err(|e| CreateDataSourceError::InvalidRecord(e.to_string()))?;
    tracing::info!(data_source_id = %source.id, "Data source created");
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> CreateDataSourceCommand {
        CreateDataSourceCommand {
            name: "Tax office".to_string(),
            description: None,
            priority: Priority::Trusted,
            allowed_operations: AllowedOperations::CreateAndAlter,
            attributes_to_check: vec!["Name".to_string()],
            variables_mapping: vec![
                VariableMapping::new("id", "StatId"),
                VariableMapping::new("name", "Name"),
            ],
            csv_delimiter: ",".to_string(),
            csv_skip_count: 0,
            upload_type: UploadType::StatUnits,
            stat_unit_type: UnitKind::LegalUnit,
        }
    }

    #[test]
    fn test_valid_command() {
        assert!(command().validate().is_ok());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let mut cmd = command();
        cmd.variables_mapping.push(VariableMapping::new("x", "Nonsense.Path"));
        assert!(matches!(cmd.validate(), Err(CreateDataSourceError::Mapping(_))));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let mut cmd = command();
        cmd.attributes_to_check.push("FavouriteColour".to_string());
        assert!(matches!(
            cmd.validate(),
            Err(CreateDataSourceError::UnknownAttribute(a)) if a == "FavouriteColour"
        ));
    }

    #[test]
    fn test_delimiter_and_skip_count() {
        let mut cmd = command();
        cmd.csv_delimiter = ";;".to_string();
        assert!(matches!(cmd.validate(), Err(CreateDataSourceError::InvalidDelimiter(_))));

        let mut cmd = command();
        cmd.csv_skip_count = -1;
        assert!(matches!(cmd.validate(), Err(CreateDataSourceError::NegativeSkipCount)));
    }

    #[test]
    fn test_command_deserializes_with_defaults() {
        let cmd: CreateDataSourceCommand = serde_json::from_value(serde_json::json!({
            "name": "Stats bureau",
            "priority": "ok",
            "variables_mapping": [{"source": "id", "target": "StatId"}],
            "stat_unit_type": "local_unit"
        }))
        .unwrap();
        assert_eq!(cmd.allowed_operations, AllowedOperations::CreateAndAlter);
        assert_eq!(cmd.upload_type, UploadType::StatUnits);
        assert_eq!(cmd.csv_delimiter, ",");
    }
}
