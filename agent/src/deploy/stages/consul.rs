use std::sync::Arc;

use async_trait::async_trait;

use crate::consul::kv::{ServiceCatalogue, ServiceRegistration};
use crate::deploy::deployment::Deployment;
use crate::deploy::stage::Stage;
use crate::errors::AgentError;

/// Announces the new deployment to the local agent
pub struct RegisterWithConsul {
    catalogue: Arc<dyn ServiceCatalogue>,
}

impl RegisterWithConsul {
    pub fn new(catalogue: Arc<dyn ServiceCatalogue>) -> Self {
        Self { catalogue }
    }
}

#[async_trait]
impl Stage for RegisterWithConsul {
    fn name(&self) -> &str {
        "RegisterWithConsul"
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let service = &deployment.service;
        let registration = ServiceRegistration {
            id: service.id.clone(),
            name: service.id.clone(),
            address: service.address.clone(),
            port: service.port,
            tags: service.tags().to_vec(),
        };

        self.catalogue
            .register_service(&registration)
            .await
            .map_err(|e| {
                AgentError::StageError(format!(
                    "Failed to register {} with Consul: {}",
                    registration.id, e
                ))
            })?;

        deployment.journal.info(format!(
            "Registered service {} with tags {}",
            registration.id,
            registration.tags.join(", ")
        ));
        Ok(())
    }
}

/// Removes the service from the local agent
pub struct DeregisterFromConsul {
    catalogue: Arc<dyn ServiceCatalogue>,
}

impl DeregisterFromConsul {
    pub fn new(catalogue: Arc<dyn ServiceCatalogue>) -> Self {
        Self { catalogue }
    }
}

#[async_trait]
impl Stage for DeregisterFromConsul {
    fn name(&self) -> &str {
        "DeregisterFromConsul"
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let service_id = deployment.service.id.clone();
        self.catalogue.deregister_service(&service_id).await?;
        deployment
            .journal
            .info(format!("Deregistered service {}", service_id));
        Ok(())
    }
}
