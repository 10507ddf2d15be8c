//! Convergence worker: reconcile, then block until the role's desired state changes

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::consul::kv::KeyValueStore;
use crate::converge::converger::Converger;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Convergence worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Backoff applied while the watched index cannot be determined
    pub cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Outcome of waiting on the watched prefix
enum Watch {
    Changed(u64),
    Unknown,
    Shutdown,
}

/// Run the convergence worker until `shutdown_signal` resolves
pub async fn run<S, F>(
    options: &Options,
    converger: &mut Converger,
    kv: Arc<dyn KeyValueStore>,
    watch_prefix: &str,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Convergence worker starting, watching {}...", watch_prefix);

    let mut last_index: Option<u64> = None;
    let mut failures: u32 = 0;

    loop {
        let watch = match last_index {
            None => match kv.current_index(watch_prefix).await {
                Ok(Some(index)) => Watch::Changed(index),
                Ok(None) => Watch::Unknown,
                Err(e) => {
                    error!("Failed to read index of {}: {}", watch_prefix, e);
                    Watch::Unknown
                }
            },
            Some(index) => {
                tokio::select! {
                    _ = &mut shutdown_signal => Watch::Shutdown,
                    result = kv.blocking_wait(watch_prefix, index) => match result {
                        Ok(observed) if observed < index => {
                            warn!("Index of {} went backwards ({} -> {})", watch_prefix, index, observed);
                            Watch::Unknown
                        }
                        Ok(observed) => Watch::Changed(observed),
                        Err(e) => {
                            error!("Blocking wait on {} failed: {}", watch_prefix, e);
                            Watch::Unknown
                        }
                    }
                }
            }
        };

        match watch {
            Watch::Shutdown => {
                info!("Convergence worker shutting down...");
                return;
            }
            Watch::Changed(index) => {
                debug!("Watched index of {} is {}", watch_prefix, index);
                last_index = Some(index);
                failures = 0;
            }
            Watch::Unknown => {
                // First pass after an unknown index runs immediately, later ones back off
                if last_index.is_none() && failures > 0 {
                    let delay = calc_exp_backoff(&options.cooldown, failures - 1);
                    debug!("Index of {} still unknown, retrying in {:?}", watch_prefix, delay);
                    tokio::select! {
                        _ = &mut shutdown_signal => {
                            info!("Convergence worker shutting down...");
                            return;
                        }
                        _ = sleep_fn(delay) => {}
                    }
                }
                last_index = None;
                failures = failures.saturating_add(1);
            }
        }

        if converger.run_once().await {
            debug!("Convergence pass succeeded");
        } else {
            warn!("Convergence pass finished with failures");
        }
    }
}
