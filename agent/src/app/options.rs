//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::consul::client::ConsulOptions;
use crate::deploy::pipeline::PipelineSettings;
use crate::deploy::script;
use crate::environment::Environment;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{ArtifactSettings, QuarantineMode, Settings, StartupSettings};
use crate::utils::CooldownOptions;
use crate::workers::converger;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Where this instance runs
    pub environment: Environment,

    /// Storage configuration
    pub layout: StorageLayout,

    /// Coordination store connection
    pub consul: ConsulOptions,

    /// Backoff while probing the coordination store at startup
    pub connect_cooldown: CooldownOptions,

    /// Instance readiness gate
    pub readiness: ReadinessOptions,

    /// Artifact store configuration
    pub artifacts: ArtifactSettings,

    /// Quarantine lifetime
    pub quarantine: QuarantineMode,

    /// Installation timeout when the installation record omits one
    pub default_hook_timeout: Duration,

    /// Pipeline settings
    pub pipeline: PipelineSettings,

    /// Script executor options
    pub script: script::Options,

    /// Convergence worker options
    pub converger_worker: converger::Options,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let layout = match &settings.deployment.root_dir {
            Some(root_dir) => StorageLayout::new(layout.config_dir, root_dir),
            None => layout,
        };

        Self {
            lifecycle: LifecycleOptions::default(),
            environment: Environment::from_settings(&settings.environment),
            layout,
            consul: ConsulOptions::from(&settings.consul),
            connect_cooldown: CooldownOptions::default(),
            readiness: ReadinessOptions::from(&settings.startup),
            artifacts: settings.artifacts.clone(),
            quarantine: settings.deployment.quarantine,
            default_hook_timeout: Duration::from_secs(settings.deployment.default_hook_timeout_secs),
            pipeline: PipelineSettings::from(settings),
            script: script::Options::default(),
            converger_worker: converger::Options::default(),
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Startup wait for an external provisioning step to finish
#[derive(Debug, Clone)]
pub struct ReadinessOptions {
    /// Semaphore file polled when waiting is enabled
    pub semaphore: Option<PathBuf>,

    pub poll_interval: Duration,

    pub max_wait: Duration,
}

impl From<&StartupSettings> for ReadinessOptions {
    fn from(settings: &StartupSettings) -> Self {
        let semaphore = if settings.wait_for_instance_readiness {
            settings.semaphore_filepath.clone()
        } else {
            None
        };
        Self {
            semaphore,
            poll_interval: Duration::from_millis(settings.readiness_poll_ms),
            max_wait: Duration::from_millis(settings.readiness_max_wait_ms),
        }
    }
}
