//! Ordered stage execution for one deployment

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info, info_span, warn, Instrument};

use crate::artifacts::ArtifactStore;
use crate::consul::kv::{CheckApi, KeyValueStore, ServiceCatalogue};
use crate::converge::converger::DeploymentRunner;
use crate::deploy::deployment::Deployment;
use crate::deploy::fsm::{PipelineEvent, PipelineFsm, PipelineState};
use crate::deploy::report::ReportWriter;
use crate::deploy::script::ScriptExecutor;
use crate::deploy::stage::Stage;
use crate::deploy::stages::{
    ApplyPermissions, CheckDiskSpace, CopyFiles, DeletePreviousDeploymentFiles,
    DeregisterFromConsul, DeregisterOldHealthChecks, DownloadBundle, LifecycleHook,
    RegisterHealthChecks, RegisterWithConsul, StopApplication, ValidateBundle, ValidateDeployment,
};
use crate::environment::Environment;
use crate::errors::AgentError;
use crate::healthchecks::consul::ConsulCheckTransport;
use crate::healthchecks::sensu::SensuCheckTransport;
use crate::healthchecks::HealthCheckRegistrar;
use crate::models::action::{Action, ActionKind};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Outcome of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentResult {
    pub id: String,
    pub is_success: bool,
}

/// Pipeline configuration derived from the agent settings
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_attempts: u32,
    pub retain_count: usize,
    pub min_free_disk_mb: u64,
    pub fail_on_hook_error: bool,
    pub sensu_checks_dir: PathBuf,
    pub plugin_search_paths: Vec<PathBuf>,
    pub log_bucket: Option<String>,
    pub log_key_prefix: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for PipelineSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.deployment.max_attempts,
            retain_count: settings.deployment.retain_count,
            min_free_disk_mb: settings.deployment.min_free_disk_mb,
            fail_on_hook_error: settings.deployment.fail_on_hook_error,
            sensu_checks_dir: settings.sensu.checks_dir.clone(),
            plugin_search_paths: settings.sensu.plugin_search_paths.clone(),
            log_bucket: settings.artifacts.log_bucket.clone(),
            log_key_prefix: settings.artifacts.log_key_prefix.clone(),
        }
    }
}

/// Collaborators shared by every pipeline
#[derive(Clone)]
pub struct PipelineDeps {
    pub kv: Arc<dyn KeyValueStore>,
    pub catalogue: Arc<dyn ServiceCatalogue>,
    pub checks: Arc<dyn CheckApi>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub executor: Arc<ScriptExecutor>,
    pub layout: StorageLayout,
}

/// Fixed list of stages run in order, stopping at the first failure
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    kv: Arc<dyn KeyValueStore>,
    artifacts: Arc<dyn ArtifactStore>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        stages: Vec<Box<dyn Stage>>,
        kv: Arc<dyn KeyValueStore>,
        artifacts: Arc<dyn ArtifactStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            stages,
            kv,
            artifacts,
            settings,
        }
    }

    fn consul_checks(deps: &PipelineDeps, settings: &PipelineSettings) -> HealthCheckRegistrar {
        HealthCheckRegistrar::new(
            Arc::new(ConsulCheckTransport::new(deps.checks.clone())),
            settings.plugin_search_paths.clone(),
        )
    }

    fn sensu_checks(settings: &PipelineSettings) -> HealthCheckRegistrar {
        HealthCheckRegistrar::new(
            Arc::new(SensuCheckTransport::new(settings.sensu_checks_dir.clone())),
            settings.plugin_search_paths.clone(),
        )
    }

    pub fn install(deps: &PipelineDeps, settings: &PipelineSettings) -> Self {
        let executor = &deps.executor;
        let fail = settings.fail_on_hook_error;
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(CheckDiskSpace::new(
                deps.layout.deployments_dir.clone(),
                settings.min_free_disk_mb,
            )),
            Box::new(ValidateDeployment),
            Box::new(DeregisterOldHealthChecks::new(Self::consul_checks(deps, settings))),
            Box::new(DeregisterOldHealthChecks::new(Self::sensu_checks(settings))),
            Box::new(StopApplication::new(executor.clone(), fail)),
            Box::new(DownloadBundle::new(deps.artifacts.clone())),
            Box::new(ValidateBundle),
            Box::new(LifecycleHook::before_install(executor.clone(), fail)),
            Box::new(CopyFiles),
            Box::new(ApplyPermissions),
            Box::new(LifecycleHook::after_install(executor.clone(), fail)),
            Box::new(LifecycleHook::start_application(executor.clone(), fail)),
            Box::new(LifecycleHook::validate_service(executor.clone(), fail)),
            Box::new(RegisterWithConsul::new(deps.catalogue.clone())),
            Box::new(RegisterHealthChecks::new(Self::consul_checks(deps, settings))),
            Box::new(RegisterHealthChecks::new(Self::sensu_checks(settings))),
            Box::new(DeletePreviousDeploymentFiles::new(
                deps.layout.clone(),
                settings.retain_count,
            )),
        ];
        Self::new(stages, deps.kv.clone(), deps.artifacts.clone(), settings.clone())
    }

    pub fn uninstall(deps: &PipelineDeps, settings: &PipelineSettings) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(ValidateDeployment),
            Box::new(DeregisterOldHealthChecks::new(Self::consul_checks(deps, settings))),
            Box::new(DeregisterOldHealthChecks::new(Self::sensu_checks(settings))),
            Box::new(StopApplication::new(
                deps.executor.clone(),
                settings.fail_on_hook_error,
            )),
            Box::new(DeregisterFromConsul::new(deps.catalogue.clone())),
            Box::new(DeletePreviousDeploymentFiles::new(
                deps.layout.clone(),
                settings.retain_count,
            )),
        ];
        Self::new(stages, deps.kv.clone(), deps.artifacts.clone(), settings.clone())
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage against `deployment` and report the outcome
    pub async fn run(&self, deployment: &mut Deployment) -> DeploymentResult {
        let span = info_span!(
            "deployment",
            deployment_id = %deployment.id,
            service_id = %deployment.service.id
        );
        self.run_stages(deployment).instrument(span).await
    }

    async fn run_stages(&self, deployment: &mut Deployment) -> DeploymentResult {
        let mut report = ReportWriter::open(
            self.kv.clone(),
            &deployment.id,
            &deployment.environment.instance_id,
        )
        .await;
        deployment.attempt_count = report.previous_attempts();
        report.start(&deployment.cause, deployment.attempt_count);
        report.write().await;

        deployment.journal.info(format!(
            "Starting deployment {} of {}",
            deployment.id, deployment.service
        ));

        let mut fsm = PipelineFsm::new();
        for stage in &self.stages {
            let name = stage.name().to_string();
            if let Err(e) = fsm.process(PipelineEvent::Start(name.clone())) {
                error!("{}", e);
                break;
            }
            deployment.journal.info(format!("Start {} stage execution.", name));

            let result = match AssertUnwindSafe(stage.run(deployment)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(AgentError::Internal(format!(
                    "Stage {} panicked: {}",
                    name,
                    panic_message(panic.as_ref())
                ))),
            };

            let event = match result {
                Ok(()) => {
                    deployment.journal.info(format!("End {} stage execution.", name));
                    PipelineEvent::StageSucceeded
                }
                Err(e) => {
                    deployment.journal.error(format!("Stage {} failed: {}", name, e));
                    PipelineEvent::StageFailed(e.to_string())
                }
            };
            if let Err(e) = fsm.process(event) {
                error!("{}", e);
            }

            report.set_attempts(deployment.attempt_count);
            report.set_last_completed_stage(fsm.last_completed_stage());
            report.write().await;

            if fsm.is_terminal() {
                break;
            }
        }

        if !fsm.is_terminal() {
            if let Err(e) = fsm.process(PipelineEvent::Finish) {
                error!("{}", e);
            }
        }

        let is_success = fsm.state() == &PipelineState::Succeeded;
        if is_success {
            deployment
                .journal
                .info(format!("Deployment {} completed successfully", deployment.id));
        } else {
            deployment.journal.error(format!(
                "Deployment {} failed: {}",
                deployment.id,
                fsm.error().unwrap_or("stage sequence interrupted")
            ));
        }

        let log_url = self.ship_journal(deployment).await;
        report.set_log(log_url);
        report.finish(is_success);
        report.write().await;

        DeploymentResult {
            id: deployment.id.clone(),
            is_success,
        }
    }

    /// Write the journal next to the deployment and upload it when configured
    async fn ship_journal(&self, deployment: &Deployment) -> Option<String> {
        let file = deployment.log_file();
        if let Err(e) = file.write_string(&deployment.journal.contents()).await {
            warn!("Failed to write deployment log {}: {}", file.path().display(), e);
            return None;
        }

        let bucket = self.settings.log_bucket.as_deref()?;
        let mut key_parts = Vec::new();
        if let Some(prefix) = self.settings.log_key_prefix.as_deref() {
            key_parts.push(prefix.trim_matches('/').to_string());
        }
        key_parts.push(deployment.environment.name.clone());
        key_parts.push(deployment.service.id.clone());
        key_parts.push(deployment.log_file_name());
        let key = key_parts.join("/");

        match self.artifacts.upload(bucket, &key, file.path()).await {
            Ok(url) => {
                if let Some(url) = &url {
                    info!("Deployment log uploaded to {}", url);
                }
                url
            }
            Err(e) => {
                warn!("Failed to upload deployment log to {}/{}: {}", bucket, key, e);
                None
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs install and uninstall actions through freshly assembled pipelines
pub struct PipelineRunner {
    deps: PipelineDeps,
    settings: PipelineSettings,
    environment: Environment,
}

impl PipelineRunner {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings, environment: Environment) -> Self {
        Self {
            deps,
            settings,
            environment,
        }
    }
}

#[async_trait]
impl DeploymentRunner for PipelineRunner {
    async fn run(&self, action: &Action, last_deployment_id: Option<String>) -> DeploymentResult {
        let pipeline = match action.kind() {
            ActionKind::Install => Pipeline::install(&self.deps, &self.settings),
            ActionKind::Uninstall => Pipeline::uninstall(&self.deps, &self.settings),
            ActionKind::Ignore => {
                return DeploymentResult {
                    id: action.deployment_id().to_string(),
                    is_success: true,
                };
            }
        };

        let mut deployment = Deployment::new(
            action.deployment_id(),
            action.service().clone(),
            last_deployment_id,
            self.environment.clone(),
            &self.deps.layout,
            self.settings.max_attempts,
        );
        let started = Instant::now();
        let result = pipeline.run(&mut deployment).await;
        info!(
            "Deployment {} finished in {}s: {}",
            result.id,
            started.elapsed().as_secs(),
            if result.is_success { "success" } else { "failure" }
        );
        result
    }
}
