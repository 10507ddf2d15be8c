//! Checks registered through the Consul agent API

use std::sync::Arc;

use async_trait::async_trait;

use crate::consul::kv::{CheckApi, CheckRegistration};
use crate::errors::AgentError;
use crate::healthchecks::command::{script_command, substitute_port};
use crate::healthchecks::{CheckKind, CheckTarget, CheckTransport, Registry, ResolvedCheck};

/// Agent-side id of a service's check
pub fn check_id(service_id: &str, check_id: &str) -> String {
    format!("{}:{}", service_id, check_id)
}

pub fn registration(target: &CheckTarget, check: &ResolvedCheck) -> CheckRegistration {
    let definition = &check.definition;

    let (http, args) = match check.kind {
        CheckKind::Http => (
            definition
                .url
                .as_deref()
                .map(|url| substitute_port(url, target.port)),
            None,
        ),
        CheckKind::Script | CheckKind::Plugin => {
            let arguments = definition
                .script_arguments
                .as_deref()
                .or(definition.plugin_arguments.as_deref());
            let args = check.executable.as_ref().map(|path| {
                script_command(path, arguments, &target.slice, target.platform).args
            });
            (None, args)
        }
    };

    CheckRegistration {
        id: check_id(&target.service_id, &check.id),
        name: check.name.clone(),
        service_id: target.service_id.clone(),
        interval: definition
            .interval
            .as_ref()
            .map(|i| i.to_duration_string())
            .unwrap_or_default(),
        http,
        args,
        timeout: definition.timeout.map(|secs| format!("{}s", secs)),
    }
}

pub struct ConsulCheckTransport {
    api: Arc<dyn CheckApi>,
}

impl ConsulCheckTransport {
    pub fn new(api: Arc<dyn CheckApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CheckTransport for ConsulCheckTransport {
    fn registry(&self) -> Registry {
        Registry::Consul
    }

    async fn register(&self, target: &CheckTarget, check: &ResolvedCheck) -> Result<(), AgentError> {
        self.api.register_check(&registration(target, check)).await
    }

    async fn deregister(&self, target: &CheckTarget, id: &str) -> Result<(), AgentError> {
        self.api.deregister_check(&check_id(&target.service_id, id)).await
    }
}
