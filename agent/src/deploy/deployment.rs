//! A single execution of an install or uninstall action

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::environment::{Environment, Platform};
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::appspec::AppSpec;
use crate::models::service::Service;
use crate::storage::layout::StorageLayout;

const ARCHIVE_DIR: &str = "archive";
const LOGS_DIR: &str = "logs";

/// Timestamped record of what happened during one deployment
#[derive(Debug, Clone, Default)]
pub struct Journal {
    lines: Vec<String>,
}

impl Journal {
    fn push(&mut self, level: &str, message: &str) {
        self.lines.push(format!(
            "{} {:<5} {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            level,
            message
        ));
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.push("INFO", message);
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!("{}", message);
        self.push("WARN", message);
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!("{}", message);
        self.push("ERROR", message);
    }

    /// Captured script output, kept out of the process log
    pub fn output(&mut self, label: &str, output: &str) {
        if output.trim().is_empty() {
            return;
        }
        self.push("INFO", &format!("{} output:", label));
        self.lines.extend(output.lines().map(|line| format!("    {}", line)));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn contents(&self) -> String {
        let mut contents = self.lines.join("\n");
        contents.push('\n');
        contents
    }
}

/// Working state shared by the stages of one pipeline run
#[derive(Debug)]
pub struct Deployment {
    pub id: String,
    pub service: Service,

    /// Deployment currently installed for the same service
    pub last_id: Option<String>,

    pub cause: String,
    pub environment: Environment,
    pub attempt_count: u32,
    pub max_attempts: u32,

    pub dir: PathBuf,
    pub archive_dir: PathBuf,
    pub last_dir: Option<PathBuf>,
    pub last_archive_dir: Option<PathBuf>,

    /// Agent home handed to hook scripts
    pub agent_dir: PathBuf,

    /// Manifest of this deployment's bundle, set by the bundle validation stage
    pub appspec: Option<AppSpec>,

    pub journal: Journal,
}

impl Deployment {
    pub fn new(
        id: impl Into<String>,
        service: Service,
        last_id: Option<String>,
        environment: Environment,
        layout: &StorageLayout,
        max_attempts: u32,
    ) -> Self {
        let id = id.into();
        let platform = environment.platform;

        let dir = layout
            .deployment_dir(platform, &service.id, &id)
            .path()
            .to_path_buf();
        let last_dir = last_id.as_ref().map(|last| {
            layout
                .deployment_dir(platform, &service.id, last)
                .path()
                .to_path_buf()
        });

        Self {
            archive_dir: dir.join(ARCHIVE_DIR),
            last_archive_dir: last_dir.as_ref().map(|d| d.join(ARCHIVE_DIR)),
            id,
            service,
            last_id,
            cause: "Deployment".to_string(),
            environment,
            attempt_count: 0,
            max_attempts,
            dir,
            last_dir,
            agent_dir: layout.config_dir.clone(),
            appspec: None,
            journal: Journal::default(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.environment.platform
    }

    /// Hook timeout when the manifest does not give one
    pub fn timeout(&self) -> Duration {
        self.service.installation.timeout
    }

    pub fn appspec(&self) -> Result<&AppSpec, AgentError> {
        self.appspec.as_ref().ok_or_else(|| {
            AgentError::ValidationError(format!(
                "Manifest of deployment {} has not been loaded",
                self.id
            ))
        })
    }

    pub fn bundle_file(&self) -> PathBuf {
        self.dir.join("bundle.zip")
    }

    pub fn log_file_name(&self) -> String {
        format!("deployment-{}-{}.log", self.environment.instance_id, self.id)
    }

    pub fn log_file(&self) -> File {
        File::new(self.dir.join(LOGS_DIR).join(self.log_file_name()))
    }
}

/// Read a manifest left by an earlier deployment, if any
pub async fn read_appspec(archive_dir: &Path) -> Result<Option<AppSpec>, AgentError> {
    let file = File::new(archive_dir.join(crate::models::appspec::MANIFEST_FILE));
    if !file.exists().await {
        return Ok(None);
    }
    let contents = file.read_string().await?;
    Ok(Some(AppSpec::parse(&contents)?))
}
