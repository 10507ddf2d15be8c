//! Batch validation of health check definitions

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::environment::Platform;
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::healthchecks::command::{http_plugin_name, resolve_script};
use crate::healthchecks::{CheckKind, Registry, ResolvedCheck};
use crate::models::healthcheck::{CheckSet, HealthCheckDefinition};

const WINDOWS_SCRIPT_EXTENSIONS: [&str; 3] = ["py", "ps1", "bat"];

/// Kind of a check, from its `type` or inferred from the fields it sets
pub fn check_kind(definition: &HealthCheckDefinition) -> Option<CheckKind> {
    match definition.check_type.as_deref().map(str::to_lowercase) {
        Some(kind) => match kind.as_str() {
            "http" => Some(CheckKind::Http),
            "script" => Some(CheckKind::Script),
            "plugin" => Some(CheckKind::Plugin),
            _ => None,
        },
        None if definition.url.is_some() => Some(CheckKind::Http),
        None if definition.plugin.is_some() => Some(CheckKind::Plugin),
        None if definition.script.is_some() => Some(CheckKind::Script),
        None => None,
    }
}

fn is_sensu_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-')
}

/// Field level checks over the whole batch. Touches nothing outside `checks`.
pub fn validate_definitions(
    registry: Registry,
    checks: &CheckSet,
    platform: Platform,
) -> Result<(), AgentError> {
    let title = registry.title();
    let invalid = |id: &str, message: &str| {
        AgentError::ValidationError(format!("{} health check '{}' {}", title, id, message))
    };

    let mut ids = BTreeSet::new();
    let mut names = BTreeSet::new();

    for (id, check) in checks {
        let kind = check_kind(check)
            .ok_or_else(|| invalid(id, "is invalid: only http, script and plugin check types are supported"))?;

        if !ids.insert(id.to_lowercase()) {
            return Err(AgentError::ValidationError(format!(
                "{} health checks require unique ids (case insensitive): '{}'",
                title, id
            )));
        }

        let name = check
            .name
            .as_deref()
            .ok_or_else(|| invalid(id, "is missing field 'name'"))?;
        if !names.insert(name.to_lowercase()) {
            return Err(AgentError::ValidationError(format!(
                "{} health checks require unique names (case insensitive): '{}'",
                title, name
            )));
        }

        if check.interval.is_none() {
            return Err(invalid(id, "is invalid: 'interval' is a required property"));
        }

        match kind {
            CheckKind::Http => {
                if check.url.is_none() {
                    return Err(invalid(id, "is missing field 'http'"));
                }
            }
            CheckKind::Script | CheckKind::Plugin => {
                match (&check.script, &check.plugin) {
                    (None, None) => {
                        return Err(invalid(id, "is invalid: you need at least one of 'script' or 'plugin'"));
                    }
                    (Some(_), Some(_)) => {
                        return Err(invalid(id, "is invalid: you can use either 'script' or 'plugin', not both"));
                    }
                    _ => {}
                }
            }
        }

        if registry == Registry::Sensu {
            if !is_sensu_name(name) {
                return Err(invalid(
                    id,
                    &format!("name '{}' does not match required Sensu name expression ^[\\w.-]+$", name),
                ));
            }
            if check.standalone == Some(true) && check.aggregate == Some(true) {
                return Err(invalid(id, "is invalid: only one of standalone and aggregate can be true"));
            }
            if platform == Platform::Windows {
                if let Some(script) = &check.script {
                    let extension = Path::new(script)
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(str::to_lowercase)
                        .unwrap_or_default();
                    if !WINDOWS_SCRIPT_EXTENSIONS.contains(&extension.as_str()) {
                        return Err(invalid(id, "is invalid: Windows scripts must be .py, .ps1 or .bat"));
                    }
                }
            }
        }
    }
    Ok(())
}

/// First search path that holds `name`
pub async fn find_plugin(search_paths: &[PathBuf], name: &str) -> Option<PathBuf> {
    for dir in search_paths {
        let candidate = dir.join(name);
        if File::new(&candidate).exists().await {
            return Some(candidate);
        }
    }
    None
}

/// Locate every script and plugin the batch refers to. Fails on the first missing one.
pub async fn resolve_executables(
    registry: Registry,
    checks: &CheckSet,
    scripts_base: &Path,
    plugin_search_paths: &[PathBuf],
    platform: Platform,
) -> Result<Vec<ResolvedCheck>, AgentError> {
    let title = registry.title();
    let mut resolved = Vec::with_capacity(checks.len());

    for (id, check) in checks {
        let kind = check_kind(check).ok_or_else(|| {
            AgentError::ValidationError(format!("{} health check '{}' has no type", title, id))
        })?;

        let executable = if let Some(script) = &check.script {
            let path = resolve_script(scripts_base, script);
            if !File::new(&path).exists().await {
                return Err(AgentError::ValidationError(format!(
                    "Couldn't find {} check script: {}",
                    title,
                    path.display()
                )));
            }
            Some(path)
        } else if let Some(plugin) = &check.plugin {
            let path = find_plugin(plugin_search_paths, plugin).await.ok_or_else(|| {
                AgentError::ValidationError(format!(
                    "Couldn't find {} plugin script: {}",
                    title, plugin
                ))
            })?;
            Some(path)
        } else if kind == CheckKind::Http && registry == Registry::Sensu {
            let name = http_plugin_name(platform);
            let path = find_plugin(plugin_search_paths, name).await.ok_or_else(|| {
                AgentError::ValidationError(format!("Couldn't find {} plugin script: {}", title, name))
            })?;
            Some(path)
        } else {
            None
        };

        resolved.push(ResolvedCheck {
            id: id.clone(),
            name: check.name.clone().unwrap_or_else(|| id.clone()),
            kind,
            definition: check.clone(),
            executable,
        });
    }
    Ok(resolved)
}
