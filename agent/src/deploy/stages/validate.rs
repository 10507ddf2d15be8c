use async_trait::async_trait;

use crate::deploy::deployment::Deployment;
use crate::deploy::script::resolve_location;
use crate::deploy::stage::Stage;
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::appspec::{AppSpec, MANIFEST_FILE};

/// Counts this attempt and stops deployments that keep failing
pub struct ValidateDeployment;

#[async_trait]
impl Stage for ValidateDeployment {
    fn name(&self) -> &str {
        "ValidateDeployment"
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let next = deployment.attempt_count + 1;
        if next > deployment.max_attempts {
            return Err(AgentError::ValidationError(format!(
                "Maximum number of attempts ({}) has been reached.",
                deployment.max_attempts
            )));
        }
        deployment.attempt_count = next;
        deployment.journal.info(format!(
            "Attempt {} of {} for deployment {}",
            next, deployment.max_attempts, deployment.id
        ));
        Ok(())
    }
}

/// Loads `appspec.yml` from the extracted bundle and checks it is usable on this host
pub struct ValidateBundle;

#[async_trait]
impl Stage for ValidateBundle {
    fn name(&self) -> &str {
        "ValidateBundle"
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let file = File::new(deployment.archive_dir.join(MANIFEST_FILE));
        if !file.exists().await {
            return Err(AgentError::ValidationError(format!(
                "Bundle has no {}",
                MANIFEST_FILE
            )));
        }
        let appspec = AppSpec::parse(&file.read_string().await?).map_err(|e| {
            AgentError::ValidationError(format!("Invalid {}: {}", MANIFEST_FILE, e))
        })?;

        validate_appspec(&appspec, deployment).await?;
        deployment.appspec = Some(appspec);
        Ok(())
    }
}

async fn validate_appspec(appspec: &AppSpec, deployment: &Deployment) -> Result<(), AgentError> {
    let invalid = |message: String| AgentError::ValidationError(format!("Invalid {}: {}", MANIFEST_FILE, message));
    let platform = deployment.platform();

    let os_matches = appspec
        .os
        .as_deref()
        .is_some_and(|os| os.eq_ignore_ascii_case(platform.as_str()));
    if !os_matches {
        return Err(invalid(format!("'os' property not set to '{}'", platform)));
    }

    for (index, file) in appspec.files().iter().enumerate() {
        if file.source.is_none() {
            return Err(invalid(format!(
                "Contains file definition {} with missing source",
                index
            )));
        }
        if file.destination.is_none() {
            return Err(invalid(format!(
                "Contains file definition {} with missing destination",
                index
            )));
        }
    }

    for (index, permission) in appspec.permissions().iter().enumerate() {
        if permission.object.is_none() {
            return Err(invalid(format!(
                "Contains permission definition {} with missing object",
                index
            )));
        }
    }

    for (event, definitions) in appspec.hooks.iter().flatten() {
        let location = definitions
            .first()
            .and_then(|hook| hook.location.as_deref())
            .filter(|location| !location.is_empty())
            .ok_or_else(|| invalid(format!("Contains hook '{}' definition with missing location", event)))?;

        let path = resolve_location(&deployment.archive_dir, location);
        if !File::new(&path).exists().await {
            return Err(invalid(format!(
                "Could not find deployment script '{}' make certain it does exist",
                location
            )));
        }
    }
    Ok(())
}
