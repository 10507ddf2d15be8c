//! Storage layout configuration

use std::path::PathBuf;

use crate::environment::Platform;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the agent
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Directory holding `settings.json`
    pub config_dir: PathBuf,

    /// Root of all deployment working directories
    pub deployments_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(config_dir: impl Into<PathBuf>, deployments_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            deployments_dir: deployments_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.config_dir.join("settings.json"))
    }

    /// Get the deployments root
    pub fn deployments_root(&self) -> Dir {
        Dir::new(&self.deployments_dir)
    }

    /// Directory holding every deployment of one service.
    ///
    /// Windows hosts use a flat layout keyed by deployment id only.
    pub fn service_root(&self, platform: Platform, service_id: &str) -> Dir {
        match platform {
            Platform::Linux => Dir::new(self.deployments_dir.join(service_id)),
            Platform::Windows => Dir::new(&self.deployments_dir),
        }
    }

    /// Working directory of one deployment
    pub fn deployment_dir(&self, platform: Platform, service_id: &str, deployment_id: &str) -> Dir {
        self.service_root(platform, service_id).subdir(deployment_id)
    }

    /// Whether deployments of different services share one directory
    pub fn is_flat(&self, platform: Platform) -> bool {
        platform == Platform::Windows
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(windows)]
        let (config_dir, deployments_dir) = (
            PathBuf::from(r"C:\cdagent"),
            PathBuf::from(r"C:\cdagent\deployments"),
        );

        #[cfg(not(windows))]
        let (config_dir, deployments_dir) = (
            PathBuf::from("/etc/cdagent"),
            PathBuf::from("/opt/cdagent/deployments"),
        );

        Self::new(config_dir, deployments_dir)
    }
}
