//! Loads the desired role and the registered catalogue from the coordination store

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::consul::keys;
use crate::consul::kv::{get_json, KeyValueStore, ServiceCatalogue};
use crate::converge::server_role::ServerRole;
use crate::environment::Environment;
use crate::errors::AgentError;
use crate::models::action::{Action, ActionKind};
use crate::models::service::{
    InstallationRecord, Service, ServiceDefinition, Slice, DEPLOYMENT_ID_TAG, SERVER_ROLE_TAG,
    SLICE_TAG, VERSION_TAG,
};

/// One key under `environments/<env>/roles/<role>/services`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleServiceEntry {
    pub name: String,
    pub version: String,
    pub deployment_id: String,

    #[serde(default = "default_slice")]
    pub slice: String,

    #[serde(default = "default_action")]
    pub action: String,
}

fn default_slice() -> String {
    "none".to_string()
}

fn default_action() -> String {
    "Install".to_string()
}

#[derive(Debug, Deserialize)]
struct DefinitionRecord {
    #[serde(rename = "Service", default)]
    service: ServiceDefinition,
}

/// Reads desired and actual state for one instance
pub struct DataLoader {
    kv: Arc<dyn KeyValueStore>,
    catalogue: Arc<dyn ServiceCatalogue>,
    environment: Environment,
    default_timeout: Option<Duration>,
}

impl DataLoader {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        catalogue: Arc<dyn ServiceCatalogue>,
        environment: Environment,
    ) -> Self {
        Self {
            kv,
            catalogue,
            environment,
            default_timeout: None,
        }
    }

    /// Installation timeout for services whose installation record omits one
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Build the role from every service entry declared for it.
    ///
    /// Entries that cannot be read or validated are skipped with a warning;
    /// store failures fail the whole load.
    pub async fn load_server_role(&self) -> Result<ServerRole, AgentError> {
        let env = &self.environment;
        let mut role = ServerRole::new(&env.server_role);
        let prefix = keys::server_role_services_key(&env.name, &env.server_role);

        for key in self.kv.find_keys(&prefix).await? {
            match self.load_action(&key).await {
                Ok(Some(action)) => {
                    debug!("Desired: {}", action);
                    role.push(action);
                }
                Ok(None) => {}
                Err(e @ AgentError::StoreError(_)) => return Err(e),
                Err(e) => {
                    warn!("Failed to read service from {}, will ignore it: {}", key, e);
                }
            }
        }
        Ok(role)
    }

    async fn load_action(&self, key: &str) -> Result<Option<Action>, AgentError> {
        let Some((entry, _)) = get_json::<RoleServiceEntry>(self.kv.as_ref(), key).await? else {
            return Ok(None);
        };

        let kind = entry.action.parse::<ActionKind>().unwrap_or_else(|_| {
            warn!(
                "Unknown deployment action '{}' for {}, will ignore it",
                entry.action, entry.deployment_id
            );
            ActionKind::Ignore
        });

        let service = self.load_service(&entry).await?;
        Ok(Some(Action::new(kind, entry.deployment_id, service)))
    }

    async fn load_service(&self, entry: &RoleServiceEntry) -> Result<Service, AgentError> {
        let env = &self.environment;
        let definition_key = keys::service_definition_key(&env.name, &entry.name, &entry.version);
        let installation_key =
            keys::service_installation_key(&env.name, &entry.name, &entry.version);

        let (definition, _) = get_json::<DefinitionRecord>(self.kv.as_ref(), &definition_key)
            .await?
            .ok_or_else(|| {
                AgentError::ValidationError(format!("No service definition at {}", definition_key))
            })?;
        let installation = get_json::<InstallationRecord>(self.kv.as_ref(), &installation_key)
            .await?
            .map(|(record, _)| record)
            .unwrap_or_default();

        let mut service = Service::from_definition(
            &definition.service,
            &installation,
            &env.ip_address,
            Slice::parse(&entry.slice),
            &entry.version,
        )?;
        if installation.installation_timeout.is_none() {
            if let Some(timeout) = self.default_timeout {
                service.installation.timeout = timeout;
            }
        }
        service.tag(DEPLOYMENT_ID_TAG, &entry.deployment_id);
        service.tag(SLICE_TAG, &entry.slice);
        service.tag(VERSION_TAG, &entry.version);
        service.tag(SERVER_ROLE_TAG, &env.server_role);
        Ok(service)
    }

    /// Services registered with the local agent that were installed by a deployment
    pub async fn load_catalogue(&self) -> Result<Vec<Service>, AgentError> {
        let mut services = Vec::new();
        for mut entry in self.catalogue.registered_services().await? {
            if !entry.tags.iter().any(|t| t.starts_with(DEPLOYMENT_ID_TAG)) {
                continue;
            }
            if entry.address.trim().is_empty() {
                entry.address = self.environment.ip_address.clone();
            }
            match Service::from_catalogue(&entry) {
                Ok(service) => services.push(service),
                Err(e) => warn!("Ignoring registered service {}: {}", entry.id, e),
            }
        }
        Ok(services)
    }
}
