//! Desired change for one service

use std::fmt;
use std::str::FromStr;

use crate::models::service::Service;

/// Kind of change requested for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Install,
    Uninstall,
    Ignore,
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "install" => Ok(ActionKind::Install),
            "uninstall" => Ok(ActionKind::Uninstall),
            "ignore" => Ok(ActionKind::Ignore),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Install => "Install",
            ActionKind::Uninstall => "Uninstall",
            ActionKind::Ignore => "Ignore",
        };
        f.write_str(name)
    }
}

/// One unit of desired change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Install { deployment_id: String, service: Service },
    Uninstall { deployment_id: String, service: Service },
    Ignore { deployment_id: String, service: Service },
}

impl Action {
    pub fn new(kind: ActionKind, deployment_id: impl Into<String>, service: Service) -> Self {
        let deployment_id = deployment_id.into();
        match kind {
            ActionKind::Install => Action::Install { deployment_id, service },
            ActionKind::Uninstall => Action::Uninstall { deployment_id, service },
            ActionKind::Ignore => Action::Ignore { deployment_id, service },
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Install { .. } => ActionKind::Install,
            Action::Uninstall { .. } => ActionKind::Uninstall,
            Action::Ignore { .. } => ActionKind::Ignore,
        }
    }

    pub fn deployment_id(&self) -> &str {
        match self {
            Action::Install { deployment_id, .. }
            | Action::Uninstall { deployment_id, .. }
            | Action::Ignore { deployment_id, .. } => deployment_id,
        }
    }

    pub fn service(&self) -> &Service {
        match self {
            Action::Install { service, .. }
            | Action::Uninstall { service, .. }
            | Action::Ignore { service, .. } => service,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind(), self.service(), self.deployment_id())
    }
}
