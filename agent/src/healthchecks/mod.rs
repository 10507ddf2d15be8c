//! Health check registration against the Consul agent and the Sensu check directory

pub mod command;
pub mod consul;
pub mod discovery;
pub mod sensu;
pub mod validate;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::environment::{Environment, Platform};
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::healthcheck::{CheckSet, HealthCheckDefinition};
use crate::models::service::{Service, Slice};

/// Where checks end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registry {
    Consul,
    Sensu,
}

impl Registry {
    pub fn as_str(&self) -> &'static str {
        match self {
            Registry::Consul => "consul",
            Registry::Sensu => "sensu",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Registry::Consul => "Consul",
            Registry::Sensu => "Sensu",
        }
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a check is attached to
#[derive(Debug, Clone)]
pub struct CheckTarget {
    pub service_id: String,
    pub service_name: String,
    pub slice: Slice,
    pub port: u16,
    pub platform: Platform,
    pub environment: String,
    pub server_role: String,
    pub cluster: Option<String>,
}

impl CheckTarget {
    pub fn new(service: &Service, environment: &Environment) -> Self {
        Self {
            service_id: service.id.clone(),
            service_name: service.name.clone(),
            slice: service.slice.clone(),
            port: service.port,
            platform: environment.platform,
            environment: environment.name.clone(),
            server_role: environment.server_role.clone(),
            cluster: environment.cluster.clone(),
        }
    }
}

/// How a check is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Http,
    Script,
    Plugin,
}

/// A check that passed validation, with its executable located
#[derive(Debug, Clone)]
pub struct ResolvedCheck {
    pub id: String,
    pub name: String,
    pub kind: CheckKind,
    pub definition: HealthCheckDefinition,

    /// Bundle script, host plugin, or the http plugin for file registries
    pub executable: Option<PathBuf>,
}

/// Registry specific delivery of resolved checks
#[async_trait]
pub trait CheckTransport: Send + Sync {
    fn registry(&self) -> Registry;

    /// Create or replace the check with the same identity
    async fn register(&self, target: &CheckTarget, check: &ResolvedCheck) -> Result<(), AgentError>;

    /// Remove a check; absence is not an error
    async fn deregister(&self, target: &CheckTarget, check_id: &str) -> Result<(), AgentError>;
}

/// Validates a batch of checks and hands them to a transport
pub struct HealthCheckRegistrar {
    transport: Arc<dyn CheckTransport>,
    plugin_search_paths: Vec<PathBuf>,
}

impl HealthCheckRegistrar {
    pub fn new(transport: Arc<dyn CheckTransport>, plugin_search_paths: Vec<PathBuf>) -> Self {
        Self {
            transport,
            plugin_search_paths,
        }
    }

    pub fn registry(&self) -> Registry {
        self.transport.registry()
    }

    /// Register every check in `checks`. Nothing is written unless the whole batch is valid.
    pub async fn register_all(
        &self,
        checks: &CheckSet,
        target: &CheckTarget,
        scripts_base: &Path,
    ) -> Result<usize, AgentError> {
        let registry = self.registry();
        validate::validate_definitions(registry, checks, target.platform)?;
        let resolved = validate::resolve_executables(
            registry,
            checks,
            scripts_base,
            &self.plugin_search_paths,
            target.platform,
        )
        .await?;

        for check in &resolved {
            if check.kind == CheckKind::Script && target.platform == Platform::Linux {
                if let Some(script) = &check.executable {
                    File::new(script).set_executable().await?;
                }
            }
            debug!("Registering {} health check {}", registry, check.id);
            self.transport.register(target, check).await?;
        }

        info!(
            "Registered {} {} health check(s) for {}",
            resolved.len(),
            registry,
            target.service_id
        );
        Ok(resolved.len())
    }

    /// Remove every check in `checks`
    pub async fn deregister_all(&self, checks: &CheckSet, target: &CheckTarget) -> Result<usize, AgentError> {
        let registry = self.registry();
        for check_id in checks.keys() {
            debug!("Deregistering {} health check {}", registry, check_id);
            self.transport.deregister(target, check_id).await?;
        }
        info!(
            "Deregistered {} {} health check(s) for {}",
            checks.len(),
            registry,
            target.service_id
        );
        Ok(checks.len())
    }
}
