//! Command lines for check executables

use std::path::{Path, PathBuf};

use crate::environment::Platform;
use crate::models::service::Slice;

const PORT_PLACEHOLDER: &str = "${PORT}";

/// Plugin that probes http checks for file registries
pub fn http_plugin_name(platform: Platform) -> &'static str {
    match platform {
        Platform::Linux => "check-http.rb",
        Platform::Windows => "ttl-check-http.bat",
    }
}

/// Bundle script location relative to `base`
pub fn resolve_script(base: &Path, script: &str) -> PathBuf {
    base.join(script.trim_start_matches(['/', '\\']))
}

/// Replace `${PORT}` with the service port, unless the service has none
pub fn substitute_port(url: &str, port: u16) -> String {
    if port == 0 {
        url.to_string()
    } else {
        url.replace(PORT_PLACEHOLDER, &port.to_string())
    }
}

/// Argument vector of a check command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCommand {
    pub args: Vec<String>,
}

impl CheckCommand {
    /// Single string form, quoting arguments that contain whitespace
    pub fn to_command_line(&self) -> String {
        self.args
            .iter()
            .map(|arg| {
                if arg.chars().any(char::is_whitespace) {
                    format!("\"{}\"", arg)
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Script path, then the static arguments, then the slice when one applies
pub fn script_command(
    path: &Path,
    arguments: Option<&str>,
    slice: &Slice,
    platform: Platform,
) -> CheckCommand {
    let path = path.display().to_string();
    let is_powershell = platform == Platform::Windows && path.to_lowercase().ends_with(".ps1");

    let mut args = if is_powershell {
        vec![
            "powershell.exe".to_string(),
            "-NonInteractive".to_string(),
            "-NoProfile".to_string(),
            "-ExecutionPolicy".to_string(),
            "RemoteSigned".to_string(),
            "-Command".to_string(),
            path,
        ]
    } else {
        vec![path]
    };

    if let Some(arguments) = arguments {
        args.extend(arguments.split_whitespace().map(str::to_string));
    }
    if let Some(slice) = slice.name() {
        args.push(slice.to_string());
    }
    CheckCommand { args }
}

/// Http probe through the platform's http plugin
pub fn http_command(plugin: &Path, url: &str, port: u16, platform: Platform) -> CheckCommand {
    let url = substitute_port(url, port);
    let plugin = plugin.display().to_string();
    let args = match platform {
        Platform::Linux => vec![plugin, "-u".to_string(), url],
        Platform::Windows => vec![plugin, url],
    };
    CheckCommand { args }
}
