//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Coordination store connection
    #[serde(default)]
    pub consul: ConsulSettings,

    /// Identity of this instance
    #[serde(default)]
    pub environment: EnvironmentSettings,

    /// Deployment pipeline configuration
    #[serde(default)]
    pub deployment: DeploymentSettings,

    /// Bundle and log storage
    #[serde(default)]
    pub artifacts: ArtifactSettings,

    /// File-based health check registry
    #[serde(default)]
    pub sensu: SensuSettings,

    /// Instance readiness gating
    #[serde(default)]
    pub startup: StartupSettings,
}

fn default_true() -> bool {
    true
}

/// Log output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Emit JSON lines on stdout
    #[serde(default)]
    pub json: bool,

    /// Directory for a daily rolling log file
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Coordination store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulSettings {
    #[serde(default = "default_consul_scheme")]
    pub scheme: String,

    #[serde(default = "default_consul_host")]
    pub host: String,

    #[serde(default = "default_consul_port")]
    pub port: u16,

    /// ACL token sent with every request
    #[serde(default)]
    pub acl_token: Option<String>,

    /// Server-side timeout for blocking queries
    #[serde(default = "default_consul_wait_secs")]
    pub wait_secs: u64,
}

fn default_consul_scheme() -> String {
    "http".to_string()
}

fn default_consul_host() -> String {
    "localhost".to_string()
}

fn default_consul_port() -> u16 {
    8500
}

fn default_consul_wait_secs() -> u64 {
    300
}

impl Default for ConsulSettings {
    fn default() -> Self {
        Self {
            scheme: default_consul_scheme(),
            host: default_consul_host(),
            port: default_consul_port(),
            acl_token: None,
            wait_secs: default_consul_wait_secs(),
        }
    }
}

/// Instance identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    /// Environment name, e.g. `c50`
    #[serde(default = "default_environment_name")]
    pub name: String,

    /// Server role this instance belongs to
    #[serde(default = "default_server_role")]
    pub server_role: String,

    /// Defaults to the host name
    #[serde(default)]
    pub instance_id: Option<String>,

    /// Address services register with
    #[serde(default)]
    pub ip_address: Option<String>,

    /// Owning cluster, used as the default alerting team
    #[serde(default)]
    pub cluster: Option<String>,
}

fn default_environment_name() -> String {
    "local".to_string()
}

fn default_server_role() -> String {
    "default".to_string()
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            name: default_environment_name(),
            server_role: default_server_role(),
            instance_id: None,
            ip_address: None,
            cluster: None,
        }
    }
}

/// How quarantined deployment ids are carried between convergence passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineMode {
    /// Forgotten whenever the server role is reloaded
    Pass,

    /// Kept in memory for the lifetime of the process
    #[default]
    Process,

    /// Stored in the coordination store and restored on startup
    Persistent,
}

/// Deployment pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
    /// Root of the per-deployment working directories
    #[serde(default)]
    pub root_dir: Option<PathBuf>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Superseded deployment directories kept beyond the current and previous one
    #[serde(default = "default_retain_count")]
    pub retain_count: usize,

    #[serde(default = "default_min_free_disk_mb")]
    pub min_free_disk_mb: u64,

    /// Hook timeout when neither the manifest nor the installation sets one
    #[serde(default = "default_hook_timeout_secs")]
    pub default_hook_timeout_secs: u64,

    #[serde(default)]
    pub quarantine: QuarantineMode,

    /// Fail the pipeline when a lifecycle hook exits non-zero
    #[serde(default = "default_true")]
    pub fail_on_hook_error: bool,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_retain_count() -> usize {
    2
}

fn default_min_free_disk_mb() -> u64 {
    500
}

fn default_hook_timeout_secs() -> u64 {
    3600
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            root_dir: None,
            max_attempts: default_max_attempts(),
            retain_count: default_retain_count(),
            min_free_disk_mb: default_min_free_disk_mb(),
            default_hook_timeout_secs: default_hook_timeout_secs(),
            quarantine: QuarantineMode::default(),
            fail_on_hook_error: true,
        }
    }
}

/// Artifact storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSettings {
    /// Base URL of the object store; a `file://` URL selects a local directory
    #[serde(default = "default_artifacts_base_url")]
    pub base_url: String,

    /// Bucket deployment logs are shipped to, disabled when unset
    #[serde(default)]
    pub log_bucket: Option<String>,

    #[serde(default)]
    pub log_key_prefix: Option<String>,
}

fn default_artifacts_base_url() -> String {
    "https://s3.amazonaws.com".to_string()
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            base_url: default_artifacts_base_url(),
            log_bucket: None,
            log_key_prefix: None,
        }
    }
}

/// File-based health check registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensuSettings {
    /// Directory watched by the local check daemon
    #[serde(default = "default_sensu_checks_dir")]
    pub checks_dir: PathBuf,

    /// Directories searched for `plugin` check executables
    #[serde(default = "default_plugin_search_paths")]
    pub plugin_search_paths: Vec<PathBuf>,
}

fn default_sensu_checks_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\opt\sensu\conf.d\checks")
    } else {
        PathBuf::from("/etc/sensu/conf.d/checks")
    }
}

fn default_plugin_search_paths() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![PathBuf::from(r"C:\opt\sensu\plugins")]
    } else {
        vec![PathBuf::from("/etc/sensu/plugins")]
    }
}

impl Default for SensuSettings {
    fn default() -> Self {
        Self {
            checks_dir: default_sensu_checks_dir(),
            plugin_search_paths: default_plugin_search_paths(),
        }
    }
}

/// Startup readiness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupSettings {
    #[serde(default)]
    pub wait_for_instance_readiness: bool,

    /// File whose content must read `ok` before the first deployment
    #[serde(default)]
    pub semaphore_filepath: Option<PathBuf>,

    #[serde(default = "default_readiness_poll_ms")]
    pub readiness_poll_ms: u64,

    #[serde(default = "default_readiness_max_wait_ms")]
    pub readiness_max_wait_ms: u64,
}

fn default_readiness_poll_ms() -> u64 {
    5000
}

fn default_readiness_max_wait_ms() -> u64 {
    1_800_000
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            wait_for_instance_readiness: false,
            semaphore_filepath: None,
            readiness_poll_ms: default_readiness_poll_ms(),
            readiness_max_wait_ms: default_readiness_max_wait_ms(),
        }
    }
}
