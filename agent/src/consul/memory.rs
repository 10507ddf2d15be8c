//! In-process coordination store used for tests and dry runs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};

use crate::consul::kv::{
    CheckApi, CheckRegistration, KeyValueStore, KvEntry, ServiceCatalogue, ServiceRegistration,
};
use crate::errors::AgentError;
use crate::models::service::CatalogueEntry;

#[derive(Default)]
struct State {
    index: u64,
    kv: BTreeMap<String, (String, u64)>,
    services: BTreeMap<String, ServiceRegistration>,
    checks: BTreeMap<String, CheckRegistration>,
}

/// Coordination store kept in memory
pub struct MemoryConsul {
    state: RwLock<State>,
    changed: Notify,
    wait: Duration,
    offline: AtomicBool,
}

impl Default for MemoryConsul {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl MemoryConsul {
    /// `wait` bounds how long a blocking watch waits for a change
    pub fn new(wait: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            changed: Notify::new(),
            wait,
            offline: AtomicBool::new(false),
        }
    }

    /// Make every call fail as if the store were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), AgentError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AgentError::StoreError("store unreachable".to_string()));
        }
        Ok(())
    }

    fn prefix_index(state: &State, prefix: &str) -> u64 {
        state
            .kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, (_, index))| *index)
            .max()
            .unwrap_or(0)
    }

    /// Set a JSON value without CAS
    pub async fn seed_json(&self, key: &str, value: &serde_json::Value) {
        let mut state = self.state.write().await;
        state.index += 1;
        let index = state.index;
        state.kv.insert(key.to_string(), (value.to_string(), index));
        drop(state);
        self.changed.notify_waiters();
    }

    /// Delete a key
    pub async fn remove(&self, key: &str) {
        let mut state = self.state.write().await;
        state.index += 1;
        state.kv.remove(key);
        drop(state);
        self.changed.notify_waiters();
    }

    /// Raw value of a key
    pub async fn value(&self, key: &str) -> Option<String> {
        self.state.read().await.kv.get(key).map(|(v, _)| v.clone())
    }

    /// Registration of a service by id
    pub async fn service(&self, service_id: &str) -> Option<ServiceRegistration> {
        self.state.read().await.services.get(service_id).cloned()
    }

    /// Ids of all registered checks
    pub async fn check_ids(&self) -> Vec<String> {
        self.state.read().await.checks.keys().cloned().collect()
    }

    /// Registration of a check by id
    pub async fn check(&self, check_id: &str) -> Option<CheckRegistration> {
        self.state.read().await.checks.get(check_id).cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryConsul {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, AgentError> {
        self.ensure_online()?;
        let state = self.state.read().await;
        Ok(state.kv.get(key).map(|(value, index)| KvEntry {
            key: key.to_string(),
            value: value.clone(),
            modify_index: *index,
        }))
    }

    async fn put(&self, key: &str, value: &str, cas: Option<u64>) -> Result<bool, AgentError> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        if let Some(expected) = cas {
            let current = state.kv.get(key).map(|(_, index)| *index).unwrap_or(0);
            if current != expected {
                return Ok(false);
            }
        }
        state.index += 1;
        let index = state.index;
        state.kv.insert(key.to_string(), (value.to_string(), index));
        drop(state);
        self.changed.notify_waiters();
        Ok(true)
    }

    async fn find_keys(&self, prefix: &str) -> Result<Vec<String>, AgentError> {
        self.ensure_online()?;
        let state = self.state.read().await;
        Ok(state
            .kv
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn current_index(&self, prefix: &str) -> Result<Option<u64>, AgentError> {
        self.ensure_online()?;
        let state = self.state.read().await;
        Ok(Some(Self::prefix_index(&state, prefix)))
    }

    async fn blocking_wait(&self, prefix: &str, last_index: u64) -> Result<u64, AgentError> {
        let deadline = tokio::time::Instant::now() + self.wait;
        loop {
            self.ensure_online()?;
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let index = Self::prefix_index(&*self.state.read().await, prefix);
            if index != last_index {
                return Ok(index);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(index);
            }
        }
    }
}

#[async_trait]
impl ServiceCatalogue for MemoryConsul {
    async fn registered_services(&self) -> Result<Vec<CatalogueEntry>, AgentError> {
        self.ensure_online()?;
        let state = self.state.read().await;
        Ok(state
            .services
            .values()
            .map(|s| CatalogueEntry {
                id: s.id.clone(),
                name: s.name.clone(),
                address: s.address.clone(),
                port: s.port,
                tags: s.tags.clone(),
            })
            .collect())
    }

    async fn register_service(&self, registration: &ServiceRegistration) -> Result<(), AgentError> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        state
            .services
            .insert(registration.id.clone(), registration.clone());
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> Result<(), AgentError> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        state.services.remove(service_id);
        state.checks.retain(|_, c| c.service_id != service_id);
        Ok(())
    }
}

#[async_trait]
impl CheckApi for MemoryConsul {
    async fn register_check(&self, check: &CheckRegistration) -> Result<(), AgentError> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        state.checks.insert(check.id.clone(), check.clone());
        Ok(())
    }

    async fn deregister_check(&self, check_id: &str) -> Result<(), AgentError> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        state.checks.remove(check_id);
        Ok(())
    }
}
