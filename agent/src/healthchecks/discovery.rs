//! Locating health check definitions inside an extracted bundle

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::healthchecks::Registry;
use crate::models::appspec::AppSpec;
use crate::models::healthcheck::CheckSet;

pub const HEALTHCHECKS_DIR: &str = "healthchecks";
pub const HEALTHCHECKS_FILE: &str = "healthchecks.yml";

/// Checks declared for one registry and the directory their scripts resolve against
#[derive(Debug, Clone, Default)]
pub struct DiscoveredChecks {
    pub checks: CheckSet,
    pub scripts_base: PathBuf,
}

impl DiscoveredChecks {
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

fn manifest_key(registry: Registry) -> String {
    format!("{}_healthchecks", registry)
}

/// Prefer `healthchecks/<registry>/healthchecks.yml`, falling back to the manifest
pub async fn discover(
    registry: Registry,
    archive_dir: &Path,
    appspec: Option<&AppSpec>,
) -> Result<DiscoveredChecks, AgentError> {
    let base = archive_dir.join(HEALTHCHECKS_DIR).join(registry.as_str());
    let file = File::new(base.join(HEALTHCHECKS_FILE));

    if file.exists().await {
        debug!("Reading {} health checks from {}", registry, file.path().display());
        let document: Value = file.read_yaml().await?;
        let checks = match document.get(manifest_key(registry)) {
            Some(section) if !section.is_null() => serde_yaml::from_value(section.clone())?,
            _ => CheckSet::new(),
        };
        return Ok(DiscoveredChecks {
            checks,
            scripts_base: base,
        });
    }

    let checks = appspec
        .and_then(|spec| match registry {
            Registry::Consul => spec.consul_healthchecks.clone(),
            Registry::Sensu => spec.sensu_healthchecks.clone(),
        })
        .unwrap_or_default();
    Ok(DiscoveredChecks {
        checks,
        scripts_base: archive_dir.to_path_buf(),
    })
}
