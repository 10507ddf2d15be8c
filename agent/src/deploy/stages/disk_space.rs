use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sysinfo::Disks;

use crate::deploy::deployment::Deployment;
use crate::deploy::stage::Stage;
use crate::errors::AgentError;

const MB: u64 = 1024 * 1024;

/// Free bytes on the disk holding `path`, picked by the longest matching mount point
pub fn available_space(path: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Refuses to start a deployment on a nearly full disk
pub struct CheckDiskSpace {
    root: PathBuf,
    min_free_mb: u64,
}

impl CheckDiskSpace {
    pub fn new(root: impl Into<PathBuf>, min_free_mb: u64) -> Self {
        Self {
            root: root.into(),
            min_free_mb,
        }
    }
}

#[async_trait]
impl Stage for CheckDiskSpace {
    fn name(&self) -> &str {
        "CheckDiskSpace"
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let Some(available) = available_space(&self.root) else {
            deployment.journal.warn(format!(
                "Could not determine free space for {}, continuing",
                self.root.display()
            ));
            return Ok(());
        };

        let available_mb = available / MB;
        if available_mb < self.min_free_mb {
            return Err(AgentError::ResourceError(format!(
                "Only {} MB free on the disk holding {}, at least {} MB required",
                available_mb,
                self.root.display(),
                self.min_free_mb
            )));
        }
        deployment
            .journal
            .info(format!("{} MB of disk space available", available_mb));
        Ok(())
    }
}
