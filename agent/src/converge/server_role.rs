//! Desired state of this instance's role and the choice of the next action

use std::collections::BTreeSet;
use std::fmt;

use tracing::{info, warn};

use crate::models::action::Action;
use crate::models::service::Service;

/// Ordered desired actions for one role plus deployments excluded from execution
#[derive(Debug, Clone)]
pub struct ServerRole {
    name: String,
    actions: Vec<Action>,
    quarantine: BTreeSet<String>,
}

impl ServerRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
            quarantine: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an action; insertion order is evaluation order
    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Deployment ids that will not be executed
    pub fn quarantined(&self) -> &BTreeSet<String> {
        &self.quarantine
    }

    pub fn is_quarantined(&self, deployment_id: &str) -> bool {
        self.quarantine.contains(deployment_id)
    }

    /// Exclude a deployment from every later `next_action` result.
    /// Returns false if it was already quarantined.
    pub fn quarantine(&mut self, deployment_id: &str) -> bool {
        info!("Quarantining deployment with ID: {}", deployment_id);
        self.quarantine.insert(deployment_id.to_string())
    }

    /// Carry over ids quarantined by earlier passes
    pub fn extend_quarantine(&mut self, ids: impl IntoIterator<Item = String>) {
        self.quarantine.extend(ids);
    }

    /// First declared action that is neither satisfied nor quarantined,
    /// together with the deployment id currently installed for its service
    pub fn next_action(&self, registered: &[Service]) -> Option<(Action, Option<String>)> {
        for action in &self.actions {
            if self.is_quarantined(action.deployment_id()) {
                warn!("Deployment action is quarantined, skipping: {}", action);
                continue;
            }
            if is_satisfied(action, registered) {
                continue;
            }

            let last_deployment_id = registered
                .iter()
                .find(|s| s.id == action.service().id)
                .and_then(|s| s.deployment_id())
                .map(str::to_string);
            return Some((action.clone(), last_deployment_id));
        }
        None
    }
}

fn is_satisfied(action: &Action, registered: &[Service]) -> bool {
    let applied = registered
        .iter()
        .any(|s| s.deployment_id() == Some(action.deployment_id()));

    match action {
        Action::Ignore { .. } => true,
        Action::Install { .. } => applied,
        Action::Uninstall { service, .. } => {
            applied || !registered.iter().any(|s| s.id == service.id)
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} action(s), {} quarantined)",
            self.name,
            self.actions.len(),
            self.quarantine.len()
        )
    }
}
