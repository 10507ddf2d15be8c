//! One reconciliation pass: apply desired actions until nothing actionable remains

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::converge::loader::DataLoader;
use crate::converge::quarantine::QuarantineStore;
use crate::deploy::pipeline::DeploymentResult;
use crate::models::action::Action;

/// Executes one action, reporting success or failure
#[async_trait]
pub trait DeploymentRunner: Send + Sync {
    async fn run(&self, action: &Action, last_deployment_id: Option<String>) -> DeploymentResult;
}

/// Drives the desired state of this instance's role onto the host
pub struct Converger {
    loader: DataLoader,
    runner: Arc<dyn DeploymentRunner>,
    quarantine: QuarantineStore,
}

impl Converger {
    pub fn new(loader: DataLoader, runner: Arc<dyn DeploymentRunner>, quarantine: QuarantineStore) -> Self {
        Self {
            loader,
            runner,
            quarantine,
        }
    }

    pub fn quarantine(&self) -> &QuarantineStore {
        &self.quarantine
    }

    /// Reconcile until no unsatisfied, non-quarantined action remains.
    ///
    /// Returns false when the role or catalogue could not be loaded or any
    /// deployment failed during the pass.
    pub async fn run_once(&mut self) -> bool {
        let mut role = match self.loader.load_server_role().await {
            Ok(role) => role,
            Err(e) => {
                error!("Failed to load server role: {}", e);
                return false;
            }
        };
        self.quarantine.apply(&mut role);
        debug!("Loaded server role {}", role);

        let mut registered = match self.loader.load_catalogue().await {
            Ok(services) => services,
            Err(e) => {
                error!("Failed to load registered services: {}", e);
                return false;
            }
        };

        let mut is_success = true;
        let mut succeeded: BTreeSet<String> = BTreeSet::new();

        while let Some((action, last_deployment_id)) = role.next_action(&registered) {
            let deployment_id = action.deployment_id().to_string();

            // A pipeline that reports success without converging would otherwise loop forever
            if succeeded.contains(&deployment_id) {
                warn!(
                    "Deployment {} succeeded but its action is still unsatisfied",
                    deployment_id
                );
                self.quarantine.quarantine(&mut role, &deployment_id).await;
                continue;
            }

            info!("Executing action: {}", action);
            let result = self.runner.run(&action, last_deployment_id).await;

            if !result.is_success {
                error!("Deployment {} failed", deployment_id);
                self.quarantine.quarantine(&mut role, &deployment_id).await;
                is_success = false;
                continue;
            }

            succeeded.insert(deployment_id);
            registered = match self.loader.load_catalogue().await {
                Ok(services) => services,
                Err(e) => {
                    error!("Failed to reload registered services: {}", e);
                    return false;
                }
            };
        }

        info!("Server role {} converged", role.name());
        is_success
    }
}
