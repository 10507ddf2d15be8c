use async_trait::async_trait;

use crate::deploy::deployment::{read_appspec, Deployment};
use crate::deploy::stage::Stage;
use crate::errors::AgentError;
use crate::healthchecks::discovery::discover;
use crate::healthchecks::{CheckTarget, HealthCheckRegistrar, Registry};

/// Registers the checks the new bundle declares for one registry
pub struct RegisterHealthChecks {
    name: &'static str,
    registrar: HealthCheckRegistrar,
}

impl RegisterHealthChecks {
    pub fn new(registrar: HealthCheckRegistrar) -> Self {
        let name = match registrar.registry() {
            Registry::Consul => "RegisterConsulHealthChecks",
            Registry::Sensu => "RegisterSensuHealthChecks",
        };
        Self { name, registrar }
    }
}

#[async_trait]
impl Stage for RegisterHealthChecks {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let registry = self.registrar.registry();
        let found = discover(registry, &deployment.archive_dir, Some(deployment.appspec()?)).await?;
        if found.is_empty() {
            deployment
                .journal
                .info(format!("No {} health checks defined", registry.title()));
            return Ok(());
        }

        let target = CheckTarget::new(&deployment.service, &deployment.environment);
        let count = self
            .registrar
            .register_all(&found.checks, &target, &found.scripts_base)
            .await?;
        deployment.journal.info(format!(
            "Registered {} {} health check(s): {}",
            count,
            registry.title(),
            found.checks.keys().cloned().collect::<Vec<_>>().join(", ")
        ));
        Ok(())
    }
}

/// Removes the checks declared by the previous deployment of the service
pub struct DeregisterOldHealthChecks {
    name: &'static str,
    registrar: HealthCheckRegistrar,
}

impl DeregisterOldHealthChecks {
    pub fn new(registrar: HealthCheckRegistrar) -> Self {
        let name = match registrar.registry() {
            Registry::Consul => "DeregisterOldConsulHealthChecks",
            Registry::Sensu => "DeregisterOldSensuHealthChecks",
        };
        Self { name, registrar }
    }
}

#[async_trait]
impl Stage for DeregisterOldHealthChecks {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let registry = self.registrar.registry();
        let Some(last_archive_dir) = deployment.last_archive_dir.clone() else {
            deployment.journal.info(format!(
                "Skipping {} stage as there is no previous deployment.",
                self.name
            ));
            return Ok(());
        };

        let Some(appspec) = read_appspec(&last_archive_dir).await? else {
            deployment.journal.warn(format!(
                "No manifest found for previous deployment in {}",
                last_archive_dir.display()
            ));
            return Ok(());
        };

        let found = discover(registry, &last_archive_dir, Some(&appspec)).await?;
        if found.is_empty() {
            return Ok(());
        }

        let target = CheckTarget::new(&deployment.service, &deployment.environment);
        let count = self.registrar.deregister_all(&found.checks, &target).await?;
        deployment.journal.info(format!(
            "Deregistered {} {} health check(s) of deployment {}",
            count,
            registry.title(),
            deployment.last_id.as_deref().unwrap_or("unknown")
        ));
        Ok(())
    }
}
