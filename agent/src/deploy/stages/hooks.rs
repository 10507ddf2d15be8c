use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::deploy::deployment::{read_appspec, Deployment};
use crate::deploy::script::{resolve_location, ScriptExecutor, ScriptOutcome};
use crate::deploy::stage::Stage;
use crate::environment::Platform;
use crate::errors::AgentError;
use crate::models::appspec::{HookDefinition, LifecycleEvent};

/// Runs the bundle script registered for one lifecycle event
pub struct LifecycleHook {
    name: &'static str,
    event: LifecycleEvent,
    executor: Arc<ScriptExecutor>,
    fail_on_error: bool,
}

impl LifecycleHook {
    pub fn new(
        name: &'static str,
        event: LifecycleEvent,
        executor: Arc<ScriptExecutor>,
        fail_on_error: bool,
    ) -> Self {
        Self {
            name,
            event,
            executor,
            fail_on_error,
        }
    }

    pub fn before_install(executor: Arc<ScriptExecutor>, fail_on_error: bool) -> Self {
        Self::new("BeforeInstall", LifecycleEvent::BeforeInstall, executor, fail_on_error)
    }

    pub fn after_install(executor: Arc<ScriptExecutor>, fail_on_error: bool) -> Self {
        Self::new("AfterInstall", LifecycleEvent::AfterInstall, executor, fail_on_error)
    }

    pub fn start_application(executor: Arc<ScriptExecutor>, fail_on_error: bool) -> Self {
        Self::new("StartApplication", LifecycleEvent::ApplicationStart, executor, fail_on_error)
    }

    pub fn validate_service(executor: Arc<ScriptExecutor>, fail_on_error: bool) -> Self {
        Self::new("ValidateService", LifecycleEvent::ValidateService, executor, fail_on_error)
    }
}

#[async_trait]
impl Stage for LifecycleHook {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let Some(hook) = deployment.appspec()?.hook(self.event).cloned() else {
            deployment.journal.info(format!(
                "Skipping {} stage as there is no hook defined.",
                self.name
            ));
            return Ok(());
        };

        let env = hook_environment(
            deployment,
            self.event,
            &deployment.id,
            &deployment.archive_dir,
        );

        let archive_dir = deployment.archive_dir.clone();
        let platform = deployment.platform();
        let timeout = deployment.timeout();
        let outcome = run_hook(&self.executor, &hook, &archive_dir, platform, &env, timeout).await?;
        settle(deployment, self.event, outcome, self.fail_on_error)
    }
}

/// Runs the previous deployment's ApplicationStop hook
pub struct StopApplication {
    executor: Arc<ScriptExecutor>,
    fail_on_error: bool,
}

impl StopApplication {
    pub fn new(executor: Arc<ScriptExecutor>, fail_on_error: bool) -> Self {
        Self {
            executor,
            fail_on_error,
        }
    }
}

#[async_trait]
impl Stage for StopApplication {
    fn name(&self) -> &str {
        "StopApplication"
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let (Some(last_id), Some(last_archive_dir)) =
            (deployment.last_id.clone(), deployment.last_archive_dir.clone())
        else {
            deployment
                .journal
                .info("Skipping StopApplication stage as there is no previous deployment.");
            return Ok(());
        };

        let Some(appspec) = read_appspec(&last_archive_dir).await? else {
            deployment.journal.warn(format!(
                "Previous deployment directory not found, id: {}",
                last_id
            ));
            return Ok(());
        };

        let event = LifecycleEvent::ApplicationStop;
        let Some(hook) = appspec.hook(event).cloned() else {
            deployment
                .journal
                .info("Skipping StopApplication stage as there is no hook defined.");
            return Ok(());
        };

        let env = hook_environment(deployment, event, &last_id, &last_archive_dir);

        // The previous bundle declares which platform its scripts target
        let platform = appspec
            .os
            .as_deref()
            .and_then(|os| os.parse::<Platform>().ok())
            .unwrap_or_else(|| deployment.platform());
        let timeout = deployment.timeout();
        let outcome = run_hook(&self.executor, &hook, &last_archive_dir, platform, &env, timeout).await?;
        settle(deployment, event, outcome, self.fail_on_error)
    }
}

/// Variables every lifecycle script can rely on
fn hook_environment(
    deployment: &Deployment,
    event: LifecycleEvent,
    deployment_id: &str,
    base_dir: &Path,
) -> BTreeMap<String, String> {
    let service = &deployment.service;
    let mut env = BTreeMap::new();
    env.insert("APPLICATION_ID".to_string(), service.id.clone());
    env.insert("DEPLOYMENT_ID".to_string(), deployment_id.to_string());
    env.insert(
        "DEPLOYMENT_BASE_DIR".to_string(),
        base_dir.display().to_string(),
    );
    env.insert("LIFECYCLE_EVENT".to_string(), event.to_string());
    env.insert("EM_SERVICE_NAME".to_string(), service.name.clone());
    env.insert(
        "EM_SERVICE_VERSION".to_string(),
        service.version.clone().unwrap_or_default(),
    );
    env.insert("EM_SERVICE_SLICE".to_string(), service.slice.to_string());
    env.insert("EM_SERVICE_PORT".to_string(), service.port.to_string());
    env.insert(
        "TTL_CDA_DIR".to_string(),
        deployment.agent_dir.display().to_string(),
    );
    env
}

async fn run_hook(
    executor: &ScriptExecutor,
    hook: &HookDefinition,
    base_dir: &Path,
    platform: Platform,
    env: &BTreeMap<String, String>,
    default_timeout: Duration,
) -> Result<ScriptOutcome, AgentError> {
    let location = hook.location.as_deref().ok_or_else(|| {
        AgentError::ValidationError("Hook definition is missing a location".to_string())
    })?;
    let path = resolve_location(base_dir, location);
    let timeout = hook.timeout.map(Duration::from_secs).unwrap_or(default_timeout);
    executor
        .run_script(&path, hook.runas.as_deref(), platform, env, timeout)
        .await
}

/// Journal the outcome and decide whether it fails the stage.
/// A timeout always does; a non-zero exit only when configured to.
fn settle(
    deployment: &mut Deployment,
    event: LifecycleEvent,
    outcome: ScriptOutcome,
    fail_on_error: bool,
) -> Result<(), AgentError> {
    deployment.journal.output(event.as_str(), &outcome.output);
    let exit_code = outcome.exit_code;
    let timed_out = outcome.timed_out;

    match outcome.into_result(&format!("Lifecycle hook {}", event)) {
        Ok(_) => {
            deployment
                .journal
                .info(format!("Lifecycle hook {} script execution succeeded.", event));
            Ok(())
        }
        Err(_) if !fail_on_error && !timed_out => {
            deployment.journal.warn(format!(
                "Lifecycle hook {} exited with code {}, continuing",
                event, exit_code
            ));
            Ok(())
        }
        Err(e) => Err(e),
    }
}
