//! Persisted deployment progress report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome recorded in a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "In Progress")]
    InProgress,
    Success,
    Failed,
}

impl ReportStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportStatus::InProgress)
    }
}

/// Value stored under `deployments/<id>/nodes/<instance>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeploymentReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_stage: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    /// URL of the shipped deployment journal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}
