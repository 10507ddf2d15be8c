//! Checks written as JSON files into the Sensu client's check directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::healthchecks::command::{http_command, script_command};
use crate::healthchecks::{CheckKind, CheckTarget, CheckTransport, Registry, ResolvedCheck};
use crate::models::service::Slice;

const DEFAULT_ALERT_AFTER: u64 = 600;
const DEFAULT_OCCURRENCES: u64 = 5;
const DEFAULT_REALERT_EVERY: u64 = 30;
const DEFAULT_TIMEOUT: u64 = 120;
const DEFAULT_RUNBOOK: &str = "Please provide useful information to resolve alert";
const DEFAULT_SLA: &str = "No SLA defined";
const DEFAULT_TIP: &str = "Fill me up with information";

/// `<service_id>-<check_id>[-<slice>].json`
pub fn check_file_name(target: &CheckTarget, check_id: &str) -> String {
    match target.slice.name() {
        Some(slice) => format!("{}-{}-{}.json", target.service_id, check_id, slice),
        None => format!("{}-{}.json", target.service_id, check_id),
    }
}

/// Name the check is known by inside Sensu.
///
/// Built from the second dash-separated segment of the service name, the
/// check name and the first letter of the slice.
pub fn unique_name(service_name: &str, check_name: &str, slice: &Slice) -> String {
    let service = service_name.split('-').nth(1).unwrap_or(service_name);
    let mut name = format!("{}-{}", service, check_name);
    if let Some(initial) = slice.name().and_then(|s| s.chars().next()) {
        name.push('-');
        name.push(initial);
    }
    name
}

/// Check file contents with every default filled in
pub fn check_definition(target: &CheckTarget, check: &ResolvedCheck) -> Value {
    let definition = &check.definition;

    let command = match (check.kind, &check.executable) {
        (CheckKind::Http, Some(plugin)) => definition
            .url
            .as_deref()
            .map(|url| http_command(plugin, url, target.port, target.platform).to_command_line()),
        (CheckKind::Script | CheckKind::Plugin, Some(path)) => {
            let arguments = definition
                .script_arguments
                .as_deref()
                .or(definition.plugin_arguments.as_deref());
            // Host plugins are shared by every slice
            let slice = if definition.plugin.is_some() {
                Slice::None
            } else {
                target.slice.clone()
            };
            Some(script_command(path, arguments, &slice, target.platform).to_command_line())
        }
        _ => None,
    };

    let team = definition
        .team
        .clone()
        .or_else(|| target.cluster.as_ref().map(|c| c.to_lowercase()));

    let body = json!({
        "aggregate": definition.aggregate.unwrap_or(false),
        "alert_after": definition.alert_after.unwrap_or(DEFAULT_ALERT_AFTER),
        "command": command,
        "handlers": definition.handlers.clone().unwrap_or_else(|| vec!["default".to_string()]),
        "interval": definition.interval.as_ref().and_then(|i| i.as_secs()),
        "notification_email": definition
            .notification_email
            .as_ref()
            .map(|e| e.joined())
            .unwrap_or_else(|| "undef".to_string()),
        "occurrences": definition.occurrences.unwrap_or(DEFAULT_OCCURRENCES),
        "page": definition.page.unwrap_or(false),
        "project": definition.project.clone().map(Value::String).unwrap_or(Value::Bool(false)),
        "realert_every": definition.realert_every.unwrap_or(DEFAULT_REALERT_EVERY),
        "runbook": definition.runbook.as_deref().unwrap_or(DEFAULT_RUNBOOK),
        "sla": definition.sla.as_deref().unwrap_or(DEFAULT_SLA),
        "slack_channel": definition
            .slack_channel
            .as_ref()
            .map(|c| c.joined())
            .unwrap_or_else(|| "undef".to_string()),
        "standalone": definition.standalone.unwrap_or(true),
        "subscribers": definition
            .subscribers
            .clone()
            .unwrap_or_else(|| vec!["sensu-base".to_string()]),
        "tags": Vec::<String>::new(),
        "team": team,
        "ticket": definition.ticket.unwrap_or(false),
        "timeout": definition.timeout.unwrap_or(DEFAULT_TIMEOUT),
        "tip": definition.tip.as_deref().unwrap_or(DEFAULT_TIP),
        "ttl_environment": target.environment,
        "ttl_owningcluster": target.cluster,
        "ttl_role": target.server_role,
    });

    json!({
        "checks": {
            unique_name(&target.service_name, &check.name, &target.slice): body
        }
    })
}

pub struct SensuCheckTransport {
    checks_dir: PathBuf,
}

impl SensuCheckTransport {
    pub fn new(checks_dir: impl Into<PathBuf>) -> Self {
        Self {
            checks_dir: checks_dir.into(),
        }
    }

    pub fn checks_dir(&self) -> &Path {
        &self.checks_dir
    }

    fn check_file(&self, target: &CheckTarget, check_id: &str) -> File {
        File::new(self.checks_dir.join(check_file_name(target, check_id)))
    }
}

#[async_trait]
impl CheckTransport for SensuCheckTransport {
    fn registry(&self) -> Registry {
        Registry::Sensu
    }

    async fn register(&self, target: &CheckTarget, check: &ResolvedCheck) -> Result<(), AgentError> {
        let file = self.check_file(target, &check.id);
        debug!("Writing Sensu check file {}", file.path().display());
        file.write_json(&check_definition(target, check)).await
    }

    async fn deregister(&self, target: &CheckTarget, check_id: &str) -> Result<(), AgentError> {
        let file = self.check_file(target, check_id);
        if !file.delete().await? {
            debug!("Sensu check file {} already absent", file.path().display());
        }
        Ok(())
    }
}
