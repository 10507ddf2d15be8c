//! Declarative health check definitions as found in bundles

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Checks keyed by their id within one manifest
pub type CheckSet = BTreeMap<String, HealthCheckDefinition>;

/// Check interval, either seconds or a duration string such as `30s`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Interval {
    Seconds(u64),
    Text(String),
}

impl Interval {
    /// Interval in whole seconds, accepting `s`, `m` and `h` suffixes
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Interval::Seconds(secs) => Some(*secs),
            Interval::Text(text) => {
                let text = text.trim();
                let (digits, unit) = match text.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
                    Some((index, _)) => text.split_at(index),
                    None => (text, "s"),
                };
                let value: u64 = digits.parse().ok()?;
                match unit {
                    "s" => Some(value),
                    "m" => Some(value * 60),
                    "h" => Some(value * 3600),
                    _ => None,
                }
            }
        }
    }

    /// Duration string with an explicit unit
    pub fn to_duration_string(&self) -> String {
        match self.as_secs() {
            Some(secs) => format!("{}s", secs),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Seconds(secs) => write!(f, "{}", secs),
            Interval::Text(text) => f.write_str(text),
        }
    }
}

/// A single value or a list, joined with commas on output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn joined(&self) -> String {
        match self {
            OneOrMany::One(value) => value.clone(),
            OneOrMany::Many(values) => values.join(","),
        }
    }
}

/// One check as declared by the bundle author
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckDefinition {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type", default)]
    pub check_type: Option<String>,

    #[serde(default)]
    pub interval: Option<Interval>,

    #[serde(alias = "http", default)]
    pub url: Option<String>,

    /// Executable shipped inside the bundle
    #[serde(default)]
    pub script: Option<String>,

    #[serde(default)]
    pub script_arguments: Option<String>,

    /// Executable installed on the host plugin search path
    #[serde(default)]
    pub plugin: Option<String>,

    #[serde(default)]
    pub plugin_arguments: Option<String>,

    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub standalone: Option<bool>,

    #[serde(default)]
    pub aggregate: Option<bool>,

    #[serde(default)]
    pub occurrences: Option<u64>,

    #[serde(default)]
    pub alert_after: Option<u64>,

    #[serde(default)]
    pub realert_every: Option<u64>,

    #[serde(default)]
    pub handlers: Option<Vec<String>>,

    #[serde(default)]
    pub subscribers: Option<Vec<String>>,

    #[serde(default)]
    pub team: Option<String>,

    #[serde(default)]
    pub notification_email: Option<OneOrMany>,

    #[serde(default)]
    pub slack_channel: Option<OneOrMany>,

    #[serde(default)]
    pub page: Option<bool>,

    #[serde(default)]
    pub ticket: Option<bool>,

    #[serde(default)]
    pub project: Option<String>,

    #[serde(default)]
    pub runbook: Option<String>,

    #[serde(default)]
    pub sla: Option<String>,

    #[serde(default)]
    pub tip: Option<String>,
}
