//! Service model shared by the desired state and the local catalogue

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

pub const DEPLOYMENT_ID_TAG: &str = "deployment_id:";
pub const SLICE_TAG: &str = "slice:";
pub const VERSION_TAG: &str = "version:";
pub const SERVER_ROLE_TAG: &str = "server_role:";

/// Installation timeout applied when the definition omits one, in minutes
const DEFAULT_INSTALLATION_TIMEOUT_MINS: u64 = 60;

/// Parallel installation label of a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Slice {
    #[default]
    None,
    Named(String),
}

impl Slice {
    pub fn parse(value: &str) -> Self {
        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            Slice::None
        } else {
            Slice::Named(value.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Slice::None => "none",
            Slice::Named(name) => name,
        }
    }

    /// The slice name when one applies
    pub fn name(&self) -> Option<&str> {
        match self {
            Slice::None => None,
            Slice::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ports a service listens on per slice
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlicePorts {
    #[serde(default)]
    pub blue: Option<u16>,

    #[serde(default)]
    pub green: Option<u16>,
}

impl SlicePorts {
    pub fn for_slice(&self, slice: &Slice) -> u16 {
        match slice.name() {
            Some(name) if name.eq_ignore_ascii_case("blue") => self.blue.unwrap_or(0),
            Some(name) if name.eq_ignore_ascii_case("green") => self.green.unwrap_or(0),
            _ => 0,
        }
    }
}

/// Where a service bundle comes from and how long hooks may run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub timeout: Duration,
    pub package_bucket: Option<String>,
    pub package_key: Option<String>,
}

impl Default for Installation {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_INSTALLATION_TIMEOUT_MINS * 60),
            package_bucket: None,
            package_key: None,
        }
    }
}

/// `environments/<env>/services/<name>/<version>/installation` value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstallationRecord {
    /// Minutes
    #[serde(default)]
    pub installation_timeout: Option<u64>,

    #[serde(default)]
    pub package_bucket: Option<String>,

    #[serde(default)]
    pub package_key: Option<String>,
}

impl From<&InstallationRecord> for Installation {
    fn from(record: &InstallationRecord) -> Self {
        let minutes = record
            .installation_timeout
            .unwrap_or(DEFAULT_INSTALLATION_TIMEOUT_MINS);
        Self {
            timeout: Duration::from_secs(minutes.saturating_mul(60)),
            package_bucket: record.package_bucket.clone(),
            package_key: record.package_key.clone(),
        }
    }
}

/// `.Service` object of a desired-state service definition
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceDefinition {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub ports: SlicePorts,
}

/// Service entry as reported by the local agent catalogue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogueEntry {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Service")]
    pub name: String,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// A deployable or deployed service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub slice: Slice,
    pub version: Option<String>,
    tags: Vec<String>,
    pub installation: Installation,
}

impl Service {
    /// Build a service from a registered catalogue entry
    pub fn from_catalogue(entry: &CatalogueEntry) -> Result<Self, AgentError> {
        let mut service = Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            address: entry.address.clone(),
            port: entry.port,
            slice: Slice::None,
            version: None,
            tags: Vec::new(),
            installation: Installation::default(),
        };
        for tag in &entry.tags {
            service.push_tag(tag);
        }
        service.slice = service
            .tag_value(SLICE_TAG)
            .map(Slice::parse)
            .unwrap_or_default();
        service.version = service.tag_value(VERSION_TAG).map(str::to_string);
        service.validate()?;
        Ok(service)
    }

    /// Build a service from its desired-state definition
    pub fn from_definition(
        definition: &ServiceDefinition,
        installation: &InstallationRecord,
        address: &str,
        slice: Slice,
        version: &str,
    ) -> Result<Self, AgentError> {
        let id = definition.id.clone().unwrap_or_default();
        let mut service = Self {
            name: definition.name.clone().unwrap_or_else(|| id.clone()),
            id,
            address: address.to_string(),
            port: definition.ports.for_slice(&slice),
            slice,
            version: Some(version.to_string()),
            tags: Vec::new(),
            installation: Installation::from(installation),
        };
        for tag in &definition.tags {
            service.push_tag(tag);
        }
        service.validate()?;
        Ok(service)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.address.trim().is_empty() {
            return Err(AgentError::ValidationError(format!(
                "Service {} is missing an address",
                self.name
            )));
        }
        if self.id.trim().is_empty() {
            return Err(AgentError::ValidationError(format!(
                "Service {} is missing an id",
                self.name
            )));
        }
        Ok(())
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Set `<prefix><value>`, replacing any tag that shares the prefix
    pub fn tag(&mut self, prefix: &str, value: &str) {
        let tag = format!("{}{}", prefix, value);
        match self.tags.iter().position(|t| t.starts_with(prefix)) {
            Some(index) => {
                self.tags[index] = tag;
                let mut seen = false;
                self.tags.retain(|t| {
                    if !t.starts_with(prefix) {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.tags.push(tag),
        }
    }

    fn push_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// Value of the first tag carrying `prefix`
    pub fn tag_value(&self, prefix: &str) -> Option<&str> {
        self.tags
            .iter()
            .find_map(|t| t.strip_prefix(prefix))
            .filter(|v| !v.is_empty())
    }

    pub fn deployment_id(&self) -> Option<&str> {
        self.tag_value(DEPLOYMENT_ID_TAG)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id: {}, slice: {}, version: {})",
            self.name,
            self.id,
            self.slice,
            self.version.as_deref().unwrap_or("unknown")
        )
    }
}
