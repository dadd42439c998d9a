//! Wire types shared by the import server and its clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::RegistryError;

/// Lifecycle status of an import job
///
/// The queue only ever moves jobs between `InQueue`, `Loading` and the two
/// terminal states. `WaitingForUpload` and `Uploading` belong to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportJobStatus {
    WaitingForUpload,
    Uploading,
    InQueue,
    Loading,
    DataLoadCompleted,
    DataLoadCompletedPartially,
}

impl ImportJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportJobStatus::WaitingForUpload => "waiting_for_upload",
            ImportJobStatus::Uploading => "uploading",
            ImportJobStatus::InQueue => "in_queue",
            ImportJobStatus::Loading => "loading",
            ImportJobStatus::DataLoadCompleted => "data_load_completed",
            ImportJobStatus::DataLoadCompletedPartially => "data_load_completed_partially",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportJobStatus::DataLoadCompleted | ImportJobStatus::DataLoadCompletedPartially
        )
    }
}

impl FromStr for ImportJobStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting_for_upload" => Ok(ImportJobStatus::WaitingForUpload),
            "uploading" => Ok(ImportJobStatus::Uploading),
            "in_queue" => Ok(ImportJobStatus::InQueue),
            "loading" => Ok(ImportJobStatus::Loading),
            "data_load_completed" => Ok(ImportJobStatus::DataLoadCompleted),
            "data_load_completed_partially" => Ok(ImportJobStatus::DataLoadCompletedPartially),
            other => Err(RegistryError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for ImportJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change channels published by the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    ImportJob,
    WorkerStatus,
}

impl Channel {
    /// Every channel the listener subscribes to
    pub const ALL: [Channel; 2] = [Channel::ImportJob, Channel::WorkerStatus];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::ImportJob => "import_job",
            Channel::WorkerStatus => "worker_status",
        }
    }
}

impl FromStr for Channel {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "import_job" => Ok(Channel::ImportJob),
            "worker_status" => Ok(Channel::WorkerStatus),
            other => Err(RegistryError::UnknownChannel(other.to_string())),
        }
    }
}

/// Kind of change carried by a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Insert,
    Update,
    Delete,
}

impl FromStr for Verb {
    type Err = RegistryError;

    /// Accepts trigger operation names (`INSERT`) as well as the serialized form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Verb::Insert),
            "update" => Ok(Verb::Update),
            "delete" => Ok(Verb::Delete),
            _ => Err(RegistryError::UnknownVerb(s.to_string())),
        }
    }
}

/// Which events a status stream connection receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionScope {
    /// Only events whose entity id is tracked
    #[default]
    UpdatesForIdsOnly,
    /// Every insert, plus updates and deletes of tracked ids
    UpdatesAndAllInserts,
}

impl SubscriptionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionScope::UpdatesForIdsOnly => "updates_for_ids_only",
            SubscriptionScope::UpdatesAndAllInserts => "updates_and_all_inserts",
        }
    }
}

impl FromStr for SubscriptionScope {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "updates_for_ids_only" => Ok(SubscriptionScope::UpdatesForIdsOnly),
            "updates_and_all_inserts" => Ok(SubscriptionScope::UpdatesAndAllInserts),
            other => Err(RegistryError::UnknownScope(other.to_string())),
        }
    }
}

/// Data of the `handshake` event sent when a status stream opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub server_time: DateTime<Utc>,
    pub connection_id: u64,
    pub scope: SubscriptionScope,
    pub ids: Vec<i64>,
}

/// Data of an entity change event on the status stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationFrame {
    pub channel: Channel,
    pub verb: Verb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub entity: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Parse a comma separated id list such as `"1, 2,3"`
///
/// Blank segments are skipped; any non-numeric segment fails the whole list.
pub fn parse_id_list(raw: &str) -> crate::Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .parse::<i64>()
                .map_err(|_| RegistryError::InvalidIds(raw.to_string()))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            ImportJobStatus::WaitingForUpload,
            ImportJobStatus::Uploading,
            ImportJobStatus::InQueue,
            ImportJobStatus::Loading,
            ImportJobStatus::DataLoadCompleted,
            ImportJobStatus::DataLoadCompletedPartially,
        ] {
            assert_eq!(status.as_str().parse::<ImportJobStatus>().unwrap(), status);
        }
        assert!("finished".parse::<ImportJobStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ImportJobStatus::DataLoadCompleted.is_terminal());
        assert!(ImportJobStatus::DataLoadCompletedPartially.is_terminal());
        assert!(!ImportJobStatus::Loading.is_terminal());
    }

    #[test]
    fn test_verb_accepts_trigger_names() {
        assert_eq!("INSERT".parse::<Verb>().unwrap(), Verb::Insert);
        assert_eq!("Update".parse::<Verb>().unwrap(), Verb::Update);
        assert_eq!("delete".parse::<Verb>().unwrap(), Verb::Delete);
        assert!("TRUNCATE".parse::<Verb>().is_err());
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!(
            "updates_and_all_inserts".parse::<SubscriptionScope>().unwrap(),
            SubscriptionScope::UpdatesAndAllInserts
        );
        assert!("everything".parse::<SubscriptionScope>().is_err());
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_id_list("").unwrap(), Vec::<i64>::new());
        assert!(parse_id_list("1,x").is_err());
    }

    #[test]
    fn test_frame_serializes_verb_and_channel() {
        let frame = NotificationFrame {
            channel: Channel::ImportJob,
            verb: Verb::Update,
            id: Some(5),
            entity: serde_json::json!({"status": "loading"}),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["channel"], "import_job");
        assert_eq!(json["verb"], "Update");
        assert_eq!(json["id"], 5);
    }
}
