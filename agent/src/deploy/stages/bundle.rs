use std::sync::Arc;

use async_trait::async_trait;

use crate::artifacts::{extract_zip, ArtifactStore};
use crate::deploy::deployment::Deployment;
use crate::deploy::stage::Stage;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;

const CONFIGURATION_PREFIX: &str = "CONFIGURATION";
const CONFIGURATION_FILE: &str = "configuration.env";

/// Fetches the service bundle and unpacks it into the archive directory
pub struct DownloadBundle {
    artifacts: Arc<dyn ArtifactStore>,
}

impl DownloadBundle {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl Stage for DownloadBundle {
    fn name(&self) -> &str {
        "DownloadBundle"
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let installation = &deployment.service.installation;
        let (Some(bucket), Some(key)) = (
            installation.package_bucket.clone(),
            installation.package_key.clone(),
        ) else {
            return Err(AgentError::ValidationError(format!(
                "No package location defined for {}",
                deployment.service.id
            )));
        };

        Dir::new(&deployment.archive_dir).create().await?;

        let bundle = deployment.bundle_file();
        deployment
            .journal
            .info(format!("Downloading {}/{} to {}", bucket, key, bundle.display()));
        if !self.artifacts.download(&bucket, &key, &bundle).await? {
            return Err(AgentError::ArtifactError(format!(
                "Bundle {}/{} does not exist",
                bucket, key
            )));
        }

        let extracted = extract_zip(&bundle, &deployment.archive_dir).await?;
        deployment.journal.info(format!(
            "Extracted {} file(s) into {}",
            extracted,
            deployment.archive_dir.display()
        ));

        let configuration_key = format!("{}/{}.config", CONFIGURATION_PREFIX, deployment.id);
        let configuration = deployment.archive_dir.join(CONFIGURATION_FILE);
        if self
            .artifacts
            .download(&bucket, &configuration_key, &configuration)
            .await?
        {
            deployment
                .journal
                .info(format!("Fetched deployment configuration {}", configuration_key));
        }
        Ok(())
    }
}
