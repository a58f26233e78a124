//! Code review state machine
//!
//! Status only moves forward: started → in_progress → completed | failed.
//! `completed` and `failed` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Code review status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Record created, processing not yet picked up
    Started,
    /// Fetch / classify / report generation running
    InProgress,
    /// Every requested standard set has a report
    Completed,
    /// Processing stopped; `error_message` says why
    Failed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Started => "started",
            ReviewStatus::InProgress => "in_progress",
            ReviewStatus::Completed => "completed",
            ReviewStatus::Failed => "failed",
        }
    }

    /// Check if status is terminal (finished)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewStatus::Completed | ReviewStatus::Failed)
    }

    /// Statuses a review may be in immediately before `self`
    pub fn predecessors(&self) -> &'static [ReviewStatus] {
        match self {
            ReviewStatus::Started => &[],
            ReviewStatus::InProgress => &[ReviewStatus::Started],
            ReviewStatus::Completed | ReviewStatus::Failed => &[ReviewStatus::InProgress],
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(ReviewStatus::Started),
            "in_progress" => Ok(ReviewStatus::InProgress),
            "completed" => Ok(ReviewStatus::Completed),
            "failed" => Ok(ReviewStatus::Failed),
            other => Err(format!("unknown review status '{}'", other)),
        }
    }
}

/// Snapshot of a requested standard set, taken when the review is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardSetRef {
    pub id: Uuid,
    pub name: String,
}

/// Rendered compliance report for one standard set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub id: Uuid,
    pub standard_set_id: Uuid,
    pub standard_set_name: String,
    /// Path of the report relative to the reports directory
    pub file_path: String,
    pub report_text: String,
    pub created_at: DateTime<Utc>,
}

/// A compliance review of one repository against one or more standard sets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeReview {
    pub id: Uuid,
    pub repository_url: String,
    pub status: ReviewStatus,
    pub standard_sets: Vec<StandardSetRef>,
    pub compliance_reports: Vec<ComplianceReport>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a code review
#[derive(Debug, Clone, Deserialize)]
pub struct CodeReviewCreate {
    pub repository_url: String,
    #[serde(alias = "standard_set_ids")]
    pub standard_sets: Vec<Uuid>,
}

impl CodeReview {
    /// Check if review is terminal (finished)
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
