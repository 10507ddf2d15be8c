//! Local instance identity

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::storage::settings::EnvironmentSettings;

/// Operating system family the agent deploys onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "windows" => Ok(Platform::Windows),
            _ => Err(format!("Unsupported platform: {}", s)),
        }
    }
}

/// Where this agent runs and which role it converges
#[derive(Debug, Clone)]
pub struct Environment {
    pub name: String,
    pub server_role: String,
    pub instance_id: String,
    pub ip_address: String,
    pub cluster: Option<String>,
    pub platform: Platform,
}

impl Environment {
    pub fn from_settings(settings: &EnvironmentSettings) -> Self {
        let instance_id = settings
            .instance_id
            .clone()
            .or_else(sysinfo::System::host_name)
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            name: settings.name.clone(),
            server_role: settings.server_role.clone(),
            instance_id,
            ip_address: settings
                .ip_address
                .clone()
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            cluster: settings.cluster.clone(),
            platform: Platform::current(),
        }
    }
}
