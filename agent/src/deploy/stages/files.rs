use std::path::PathBuf;

use async_trait::async_trait;

use crate::deploy::deployment::Deployment;
use crate::deploy::script::resolve_location;
use crate::deploy::stage::Stage;
use crate::environment::Platform;
use crate::errors::AgentError;
use crate::filesys::dir::{copy_tree, Dir};

/// Copies manifest `files` entries from the bundle to their destinations
pub struct CopyFiles;

#[async_trait]
impl Stage for CopyFiles {
    fn name(&self) -> &str {
        "CopyFiles"
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        let mappings: Vec<(PathBuf, PathBuf)> = deployment
            .appspec()?
            .files()
            .iter()
            .filter_map(|f| {
                let source = f.source.as_deref()?;
                let destination = f.destination.as_deref()?;
                Some((
                    resolve_location(&deployment.archive_dir, source),
                    PathBuf::from(destination),
                ))
            })
            .collect();

        if mappings.is_empty() {
            deployment.journal.info(
                "Skipping CopyFiles stage as there are no file operations defined in appspec.yml.",
            );
            return Ok(());
        }

        for (_, destination) in &mappings {
            let dir = Dir::new(destination);
            if dir.exists().await {
                deployment.journal.info(format!(
                    "Destination {} already exists, cleaning up first.",
                    destination.display()
                ));
                dir.delete().await?;
            }
        }

        for (source, destination) in &mappings {
            deployment.journal.info(format!(
                "Copying {} to {}",
                source.display(),
                destination.display()
            ));
            copy_tree(source, destination).await?;
        }
        Ok(())
    }
}

/// Applies manifest ownership and mode rules on Linux hosts
pub struct ApplyPermissions;

#[async_trait]
impl Stage for ApplyPermissions {
    fn name(&self) -> &str {
        "ApplyPermissions"
    }

    async fn run(&self, deployment: &mut Deployment) -> Result<(), AgentError> {
        if deployment.platform() != Platform::Linux {
            deployment
                .journal
                .info("Skipping ApplyPermissions stage on a non Linux host.");
            return Ok(());
        }

        let rules = deployment.appspec()?.permissions().to_vec();
        for rule in rules {
            let Some(object) = rule.object.as_deref() else {
                continue;
            };
            apply_rule(deployment, object, &rule).await?;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn apply_rule(
    deployment: &mut Deployment,
    object: &str,
    rule: &crate::models::appspec::PermissionRule,
) -> Result<(), AgentError> {
    use nix::unistd::{Group, User};

    use crate::filesys::dir::{chmod_recursive, chown_recursive};
    use crate::utils::parse_octal_mode;

    let path = PathBuf::from(object);

    let uid = match rule.owner.as_deref() {
        Some(owner) => Some(
            User::from_name(owner)
                .map_err(|e| AgentError::StageError(format!("Failed to look up user {}: {}", owner, e)))?
                .ok_or_else(|| AgentError::StageError(format!("Unknown user {}", owner)))?
                .uid
                .as_raw(),
        ),
        None => None,
    };
    let gid = match rule.group.as_deref() {
        Some(group) => Some(
            Group::from_name(group)
                .map_err(|e| AgentError::StageError(format!("Failed to look up group {}: {}", group, e)))?
                .ok_or_else(|| AgentError::StageError(format!("Unknown group {}", group)))?
                .gid
                .as_raw(),
        ),
        None => None,
    };

    if uid.is_some() || gid.is_some() {
        deployment.journal.info(format!(
            "Setting owner {}:{} on {}",
            rule.owner.as_deref().unwrap_or("-"),
            rule.group.as_deref().unwrap_or("-"),
            path.display()
        ));
        chown_recursive(&path, uid, gid).await?;
    }

    if let Some(mode) = rule.mode {
        let parsed = parse_octal_mode(mode).ok_or_else(|| {
            AgentError::ValidationError(format!("Invalid mode {} for {}", mode, object))
        })?;
        deployment
            .journal
            .info(format!("Setting mode {} on {}", mode, path.display()));
        chmod_recursive(&path, parsed).await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn apply_rule(
    _deployment: &mut Deployment,
    _object: &str,
    _rule: &crate::models::appspec::PermissionRule,
) -> Result<(), AgentError> {
    Ok(())
}
