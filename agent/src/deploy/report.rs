//! Persisting deployment progress to the coordination store

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::consul::keys;
use crate::consul::kv::{get_json, KeyValueStore};
use crate::errors::AgentError;
use crate::models::report::{DeploymentReport, ReportStatus};

const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Stage name recorded once every stage has succeeded
pub const COMPLETE_STAGE: &str = "Complete";

/// Owns this instance's report of one deployment
pub struct ReportWriter {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    report: DeploymentReport,
    index: Option<u64>,
}

impl ReportWriter {
    /// Load the report left by an earlier attempt, if any
    pub async fn open(kv: Arc<dyn KeyValueStore>, deployment_id: &str, instance_id: &str) -> Self {
        let key = keys::deployment_report_key(deployment_id, instance_id);
        let (report, index) = match get_json::<DeploymentReport>(kv.as_ref(), &key).await {
            Ok(Some((report, index))) => (report, Some(index)),
            Ok(None) => (DeploymentReport::default(), None),
            Err(e) => {
                warn!("Could not read previous report at {}: {}", key, e);
                (DeploymentReport::default(), None)
            }
        };
        Self {
            kv,
            key,
            report,
            index,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn report(&self) -> &DeploymentReport {
        &self.report
    }

    /// Attempts recorded by earlier runs of the same deployment
    pub fn previous_attempts(&self) -> u32 {
        self.report.number_of_attempts.unwrap_or(0)
    }

    pub fn start(&mut self, cause: &str, attempts: u32) {
        self.report = DeploymentReport {
            status: Some(ReportStatus::InProgress),
            start_time: Some(Utc::now()),
            end_time: None,
            last_completed_stage: None,
            number_of_attempts: Some(attempts),
            cause: Some(cause.to_string()),
            log: None,
        };
    }

    pub fn set_attempts(&mut self, attempts: u32) {
        self.report.number_of_attempts = Some(attempts);
    }

    pub fn set_last_completed_stage(&mut self, stage: Option<&str>) {
        self.report.last_completed_stage = stage.map(str::to_string);
    }

    pub fn set_log(&mut self, url: Option<String>) {
        self.report.log = url;
    }

    /// Write the single terminal status
    pub fn finish(&mut self, is_success: bool) {
        self.report.end_time = Some(Utc::now());
        if is_success {
            self.report.status = Some(ReportStatus::Success);
            self.report.last_completed_stage = Some(COMPLETE_STAGE.to_string());
        } else {
            self.report.status = Some(ReportStatus::Failed);
        }
    }

    /// Store the report with check-and-set, re-reading the index on conflict.
    /// Failures are logged; the deployment itself carries on.
    pub async fn write(&mut self) -> bool {
        match self.try_write().await {
            Ok(written) => written,
            Err(e) => {
                warn!("Failed to write deployment report {}: {}", self.key, e);
                false
            }
        }
    }

    async fn try_write(&mut self) -> Result<bool, AgentError> {
        let value = serde_json::to_string(&self.report)?;

        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let cas = self.index.unwrap_or(0);
            if self.kv.put(&self.key, &value, Some(cas)).await? {
                self.index = self.kv.get(&self.key).await?.map(|entry| entry.modify_index);
                debug!("Report {} written ({:?})", self.key, self.report.status);
                return Ok(true);
            }

            debug!(
                "Report {} changed concurrently, retrying (attempt {})",
                self.key,
                attempt + 1
            );
            self.index = self.kv.get(&self.key).await?.map(|entry| entry.modify_index);
        }

        warn!(
            "Giving up writing report {} after {} conflicting attempts",
            self.key, MAX_WRITE_ATTEMPTS
        );
        Ok(false)
    }
}
