//! `--diagnostic` report printed to stdout

use colored::Colorize;

use crate::consul::client::{ConsulClient, ConsulOptions};
use crate::consul::keys;
use crate::consul::kv::KeyValueStore;
use crate::deploy::stages::disk_space::available_space;
use crate::environment::Environment;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::{version_info, CooldownOptions};

fn ok(label: &str, detail: impl AsRef<str>) {
    println!("[{}] {}: {}", "ok".green().bold(), label, detail.as_ref());
}

fn warn(label: &str, detail: impl AsRef<str>) {
    println!("[{}] {}: {}", "warn".yellow().bold(), label, detail.as_ref());
}

fn fail(label: &str, detail: impl AsRef<str>) {
    println!("[{}] {}: {}", "fail".red().bold(), label, detail.as_ref());
}

/// Print what the agent would converge and whether it can reach its collaborators
pub async fn run_diagnostic(settings: &Settings, layout: &StorageLayout) {
    let version = version_info();
    println!(
        "{} {} ({}, built {})",
        "cdagent".bold(),
        version.version,
        version.git_hash,
        version.build_time
    );

    let environment = Environment::from_settings(&settings.environment);
    ok(
        "environment",
        format!(
            "{} / role {} / instance {} ({})",
            environment.name, environment.server_role, environment.instance_id, environment.platform
        ),
    );

    let services_key = keys::server_role_services_key(&environment.name, &environment.server_role);
    ok("role services", &services_key);
    ok("quarantine", keys::quarantine_key(&environment.instance_id));

    // One attempt only, the diagnostic must not hang on an unreachable agent
    let options = ConsulOptions {
        max_retries: 0,
        cooldown: CooldownOptions::default(),
        ..ConsulOptions::from(&settings.consul)
    };
    match ConsulClient::new(&options) {
        Ok(client) => match client.check_connectivity().await {
            Ok(()) => {
                ok("consul", client.base_url());
                match client.find_keys(&services_key).await {
                    Ok(found) => ok("desired services", format!("{} key(s)", found.len())),
                    Err(e) => warn("desired services", e.to_string()),
                }
            }
            Err(e) => fail("consul", format!("{} unreachable: {}", client.base_url(), e)),
        },
        Err(e) => fail("consul", e.to_string()),
    }

    let root = layout.deployments_root();
    let required = settings.deployment.min_free_disk_mb;
    match available_space(root.path()) {
        Some(bytes) => {
            let free_mb = bytes / (1024 * 1024);
            let detail = format!("{} MB free on {} (need {} MB)", free_mb, root.path().display(), required);
            if free_mb >= required {
                ok("disk", detail);
            } else {
                fail("disk", detail);
            }
        }
        None => warn("disk", format!("no disk found for {}", root.path().display())),
    }
}
