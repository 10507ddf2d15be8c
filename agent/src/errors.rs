//! Error types for the deployment agent

use thiserror::Error;

/// Main error type for the deployment agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    /// Connectivity or server-side failure of the coordination store
    #[error("Coordination store error: {0}")]
    StoreError(String),

    /// Malformed manifest, service definition or health check
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A lifecycle script or stage step failed
    #[error("Stage error: {0}")]
    StageError(String),

    #[error("Script timed out: {0}")]
    ScriptTimeout(String),

    /// Host resources (disk space) are insufficient
    #[error("Resource error: {0}")]
    ResourceError(String),

    #[error("Artifact error: {0}")]
    ArtifactError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether a coordination store call failing with this error is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::StoreError(_) => true,
            AgentError::HttpError(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}
