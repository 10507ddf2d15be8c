use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::deploy::deployment::Deployment;
use crate::deploy::retention::{directories_to_delete, RetentionCandidate};
use crate::deploy::stage::Stage;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::storage::layout::StorageLayout;

/// Reclaims disk space taken by superseded deployments of the service
pub struct DeletePreviousDeploymentFiles {
    layout: StorageLayout,
    retain_count: usize,
}

impl DeletePreviousDeploymentFiles {
    pub fn new(layout: StorageLayout, retain_count: usize) -> Self {
        Self {
            layout,
            retain_count,
        }
    }

    async fn candidates(&self, deployment: &Deployment) -> Result<Vec<RetentionCandidate>, AgentError> {
        let platform = deployment.platform();

        // A flat root mixes services and the previous deployment is protected
        if self.layout.is_flat(platform) {
            return Ok(Vec::new());
        }

        let root = self.layout.service_root(platform, &deployment.service.id);
        if !root.exists().await {
            return Ok(Vec::new());
        }
        Ok(root
            .list_dirs_created()
            .await?
            .into_iter()
            .map(RetentionCandidate::from)
            .collect())
    }
}

#[async_trait]
impl Stage for DeletePreviousDeploymentFiles {
    fn name(&self) -> &str {
        "DeletePreviousDeploymentFiles"
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let candidates = self.candidates(deployment).await?;

        let mut protected: BTreeSet<PathBuf> = BTreeSet::new();
        protected.insert(deployment.dir.clone());
        if let Some(last_dir) = &deployment.last_dir {
            protected.insert(last_dir.clone());
        }

        let doomed = directories_to_delete(&candidates, &protected, self.retain_count);
        if doomed.is_empty() {
            deployment
                .journal
                .info("No previous deployment directories to delete");
            return Ok(());
        }

        for path in doomed {
            match Dir::new(&path).delete().await {
                Ok(()) => deployment
                    .journal
                    .info(format!("Deleted previous deployment directory {}", path.display())),
                Err(e) => deployment.journal.warn(format!(
                    "Could not delete {}, skipping: {}",
                    path.display(),
                    e
                )),
            }
        }
        Ok(())
    }
}
