//! cdagent - Entry Point
//!
//! Host deployment agent: converges the services declared for this
//! instance's role in Consul onto the local machine.

use std::collections::HashMap;
use std::env;

use cdagent::app::options::AppOptions;
use cdagent::app::run::run;
use cdagent::diagnostics::run_diagnostic;
use cdagent::logs::{init_logging, LogOptions};
use cdagent::storage::layout::StorageLayout;
use cdagent::storage::settings::Settings;
use cdagent::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let mut layout = StorageLayout::default();
    if let Some(config_dir) = cli_args.get("config-dir") {
        layout.config_dir = config_dir.into();
    }

    // Retrieve the settings file, falling back to defaults when it is missing
    let settings_file = layout.settings_file();
    let (settings, settings_error) = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => (settings, None),
            Err(e) => {
                eprintln!("Unable to read settings file {}: {}", settings_file.path().display(), e);
                return;
            }
        }
    } else {
        (
            Settings::default(),
            Some(format!("{} not found, using defaults", settings_file.path().display())),
        )
    };

    let options = AppOptions::from_settings(&settings, layout);

    // Run diagnostics
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        run_diagnostic(&settings, &options.layout).await;
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.logging.log_dir.clone(),
        json_format: settings.logging.json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };
    if let Some(message) = settings_error {
        warn!("{}", message);
    }

    info!("Running cdagent {} with options: {:?}", version.version, options);
    let result = run(options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the agent: {e}");
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
