//! Pipeline stage contract

use async_trait::async_trait;

use crate::deploy::deployment::Deployment;
use crate::errors::AgentError;

/// One named step of a deployment pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name recorded as the report's last completed stage
    fn name(&self) -> &str;

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError>;
}
