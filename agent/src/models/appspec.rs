//! Bundle manifest (`appspec.yml`)

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::models::healthcheck::CheckSet;

pub const MANIFEST_FILE: &str = "appspec.yml";

/// Named points in the pipeline where bundle scripts run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    ApplicationStop,
    BeforeInstall,
    AfterInstall,
    ApplicationStart,
    ValidateService,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 5] = [
        LifecycleEvent::ApplicationStop,
        LifecycleEvent::BeforeInstall,
        LifecycleEvent::AfterInstall,
        LifecycleEvent::ApplicationStart,
        LifecycleEvent::ValidateService,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::ApplicationStop => "ApplicationStop",
            LifecycleEvent::BeforeInstall => "BeforeInstall",
            LifecycleEvent::AfterInstall => "AfterInstall",
            LifecycleEvent::ApplicationStart => "ApplicationStart",
            LifecycleEvent::ValidateService => "ValidateService",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileMapping {
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionRule {
    #[serde(default)]
    pub object: Option<String>,

    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub group: Option<String>,

    /// Octal digits written in decimal, e.g. `755`
    #[serde(default)]
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookDefinition {
    /// Script path relative to the bundle root
    #[serde(default)]
    pub location: Option<String>,

    /// Seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub runas: Option<String>,
}

/// Parsed `appspec.yml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSpec {
    #[serde(default)]
    pub os: Option<String>,

    #[serde(default)]
    pub files: Option<Vec<FileMapping>>,

    #[serde(default)]
    pub permissions: Option<Vec<PermissionRule>>,

    #[serde(default)]
    pub hooks: Option<BTreeMap<String, Vec<HookDefinition>>>,

    #[serde(default)]
    pub consul_healthchecks: Option<CheckSet>,

    #[serde(default)]
    pub sensu_healthchecks: Option<CheckSet>,
}

impl AppSpec {
    pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        let spec: Option<AppSpec> = serde_yaml::from_str(contents)?;
        Ok(spec.unwrap_or_default())
    }

    pub fn files(&self) -> &[FileMapping] {
        self.files.as_deref().unwrap_or_default()
    }

    pub fn permissions(&self) -> &[PermissionRule] {
        self.permissions.as_deref().unwrap_or_default()
    }

    /// First hook declared for `event`
    pub fn hook(&self, event: LifecycleEvent) -> Option<&HookDefinition> {
        self.hooks
            .as_ref()
            .and_then(|hooks| hooks.get(event.as_str()))
            .and_then(|defs| defs.first())
    }
}
