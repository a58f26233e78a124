//! Standard sets and the standards extracted from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ingest lifecycle of a standard set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Registered, ingest not yet started
    Pending,
    /// Fetch / classify / persist running
    InProgress,
    /// Last ingest committed
    Completed,
    /// Last ingest rolled back; `error_message` says why
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Pending => "pending",
            IngestStatus::InProgress => "in_progress",
            IngestStatus::Completed => "completed",
            IngestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IngestStatus::Pending),
            "in_progress" => Ok(IngestStatus::InProgress),
            "completed" => Ok(IngestStatus::Completed),
            "failed" => Ok(IngestStatus::Failed),
            other => Err(format!("unknown ingest status '{}'", other)),
        }
    }
}

/// One ingestible source of standards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardSet {
    pub id: Uuid,
    pub name: String,
    pub repository_url: String,
    pub custom_prompt: Option<String>,
    pub ingest_status: IngestStatus,
    pub error_message: Option<String>,
    /// Ingest attempt whose standards are currently visible
    #[serde(skip)]
    pub active_ingest_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for registering (or re-ingesting) a standard set
#[derive(Debug, Clone, Deserialize)]
pub struct StandardSetCreate {
    pub name: String,
    pub repository_url: String,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

/// A standard set together with its visible standards
#[derive(Debug, Clone, Serialize)]
pub struct StandardSetWithStandards {
    #[serde(flatten)]
    pub standard_set: StandardSet,
    pub standards: Vec<Standard>,
}

/// One atomic rule extracted from a standard set's repository
///
/// Empty `classification_ids` means the standard is universal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standard {
    pub id: Uuid,
    pub text: String,
    pub repository_path: String,
    pub standard_set_id: Uuid,
    pub classification_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Standard {
    pub fn is_universal(&self) -> bool {
        self.classification_ids.is_empty()
    }
}

/// A standard staged by an ingest attempt, before ids are assigned
#[derive(Debug, Clone)]
pub struct NewStandard {
    pub text: String,
    pub repository_path: String,
    pub classification_ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_status_string_forms_agree() {
        for status in [
            IngestStatus::Pending,
            IngestStatus::InProgress,
            IngestStatus::Completed,
            IngestStatus::Failed,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
            assert_eq!(status.as_str().parse::<IngestStatus>().unwrap(), status);
        }
        assert!("running".parse::<IngestStatus>().is_err());
    }

    #[test]
    fn test_active_ingest_id_not_serialized() {
        let set = StandardSet {
            id: Uuid::new_v4(),
            name: "python".to_string(),
            repository_url: "https://example.com/standards.git".to_string(),
            custom_prompt: None,
            ingest_status: IngestStatus::Completed,
            error_message: None,
            active_ingest_id: Some(Uuid::new_v4()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(&set).unwrap();
        assert!(json.get("active_ingest_id").is_none());
        assert_eq!(json["ingest_status"], "completed");
    }
}
