//! Main application run loop

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions, ReadinessOptions};
use crate::artifacts;
use crate::consul::client::ConsulClient;
use crate::consul::keys;
use crate::converge::converger::Converger;
use crate::converge::loader::DataLoader;
use crate::converge::quarantine::QuarantineStore;
use crate::deploy::pipeline::{PipelineDeps, PipelineRunner};
use crate::deploy::script::ScriptExecutor;
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::utils::{calc_exp_backoff, CooldownOptions};
use crate::workers::converger;

type ShutdownSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Run the deployment agent
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!(
        "Initializing deployment agent for {}/{} on {}...",
        options.environment.name, options.environment.server_role, options.environment.instance_id
    );

    let mut shutdown_signal: ShutdownSignal = Box::pin(shutdown_signal);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let started = match init(&options, &mut shutdown_signal, &shutdown_tx, &mut shutdown_manager).await {
        Ok(started) => started,
        Err(e) => {
            error!("Failed to start agent: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    if started {
        shutdown_signal.await;
        info!("Shutdown signal received, shutting down...");
    } else {
        info!("Shutdown signal received during startup, shutting down...");
    }

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

/// Returns false when shutdown arrived before the worker was started
async fn init(
    options: &AppOptions,
    shutdown_signal: &mut ShutdownSignal,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<bool, AgentError> {
    let consul = Arc::new(ConsulClient::new(&options.consul)?);

    if !await_connectivity(&consul, &options.connect_cooldown, shutdown_signal).await {
        return Ok(false);
    }

    if !await_instance_readiness(&options.readiness, shutdown_signal).await {
        return Ok(false);
    }

    let environment = options.environment.clone();

    let mut quarantine = QuarantineStore::new(options.quarantine, consul.clone(), &environment.instance_id);
    if let Err(e) = quarantine.load().await {
        warn!("Failed to restore quarantined deployments: {}", e);
    }

    let deps = PipelineDeps {
        kv: consul.clone(),
        catalogue: consul.clone(),
        checks: consul.clone(),
        artifacts: artifacts::from_settings(&options.artifacts)?,
        executor: Arc::new(ScriptExecutor::new(options.script.clone())),
        layout: options.layout.clone(),
    };
    let runner = Arc::new(PipelineRunner::new(
        deps,
        options.pipeline.clone(),
        environment.clone(),
    ));

    let loader = DataLoader::new(consul.clone(), consul.clone(), environment.clone())
        .with_default_timeout(options.default_hook_timeout);
    let converger = Converger::new(loader, runner, quarantine);

    init_converger_worker(
        options.converger_worker.clone(),
        converger,
        consul,
        keys::server_role_services_key(&environment.name, &environment.server_role),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    Ok(true)
}

/// Probe the coordination store until it answers. Returns false on shutdown.
async fn await_connectivity(
    consul: &ConsulClient,
    cooldown: &CooldownOptions,
    shutdown_signal: &mut ShutdownSignal,
) -> bool {
    let mut attempt: u32 = 0;
    loop {
        match consul.check_connectivity().await {
            Ok(()) => {
                info!("Connected to Consul at {}", consul.base_url());
                return true;
            }
            Err(e) => {
                let delay = calc_exp_backoff(cooldown, attempt);
                warn!("Consul is not reachable: {}, retrying in {:?}", e, delay);
                tokio::select! {
                    _ = &mut *shutdown_signal => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Wait for the readiness semaphore to read `ok`. Returns false on shutdown.
async fn await_instance_readiness(options: &ReadinessOptions, shutdown_signal: &mut ShutdownSignal) -> bool {
    let Some(path) = &options.semaphore else {
        return true;
    };

    info!("Waiting for instance readiness semaphore {}...", path.display());
    let semaphore = File::new(path);
    let deadline = Instant::now() + options.max_wait;

    loop {
        if let Ok(content) = semaphore.read_string().await {
            if content.trim() == "ok" {
                info!("Instance is ready");
                return true;
            }
        }
        if Instant::now() >= deadline {
            warn!(
                "Instance readiness not signalled after {:?}, assuming it is ready",
                options.max_wait
            );
            return true;
        }
        tokio::select! {
            _ = &mut *shutdown_signal => return false,
            _ = tokio::time::sleep(options.poll_interval) => {}
        }
    }
}

async fn init_converger_worker(
    options: converger::Options,
    mut converger: Converger,
    consul: Arc<ConsulClient>,
    watch_prefix: String,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing convergence worker...");

    let converger_handle = tokio::spawn(async move {
        converger::run(
            &options,
            &mut converger,
            consul,
            &watch_prefix,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_converger_worker_handle(converger_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    converger_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            converger_worker_handle: None,
        }
    }

    pub fn with_converger_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.converger_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("converger_handle already set".to_string()));
        }
        self.converger_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down deployment agent...");

        if let Some(handle) = self.converger_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
