//! Coordination store interfaces consumed by the agent

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::errors::AgentError;
use crate::models::service::CatalogueEntry;

/// A stored value together with its version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    pub modify_index: u64,
}

/// Key/value access with compare-and-swap and blocking watches
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a key, `None` when absent
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, AgentError>;

    /// Write a key. With `cas` set, the write only applies if the key's
    /// modify index still equals it (`0` means "create only") and the
    /// return value reports whether it applied.
    async fn put(&self, key: &str, value: &str, cas: Option<u64>) -> Result<bool, AgentError>;

    /// All keys below `prefix`
    async fn find_keys(&self, prefix: &str) -> Result<Vec<String>, AgentError>;

    /// Current modify index of `prefix` without blocking
    async fn current_index(&self, prefix: &str) -> Result<Option<u64>, AgentError>;

    /// Block until the index of `prefix` moves past `last_index` or the
    /// server-side wait elapses, returning the index observed either way
    async fn blocking_wait(&self, prefix: &str, last_index: u64) -> Result<u64, AgentError>;
}

/// Read and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(
    kv: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<(T, u64)>, AgentError> {
    match kv.get(key).await? {
        Some(entry) => {
            let value = serde_json::from_str(&entry.value)?;
            Ok(Some((value, entry.modify_index)))
        }
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub async fn put_json<T: Serialize + Sync>(
    kv: &dyn KeyValueStore,
    key: &str,
    value: &T,
    cas: Option<u64>,
) -> Result<bool, AgentError> {
    let encoded = serde_json::to_string(value)?;
    kv.put(key, &encoded, cas).await
}

/// Agent service registration payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

/// Services registered with the local agent
#[async_trait]
pub trait ServiceCatalogue: Send + Sync {
    async fn registered_services(&self) -> Result<Vec<CatalogueEntry>, AgentError>;

    async fn register_service(&self, registration: &ServiceRegistration) -> Result<(), AgentError>;

    async fn deregister_service(&self, service_id: &str) -> Result<(), AgentError>;
}

/// Agent check registration payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub interval: String,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Health checks registered with the local agent
#[async_trait]
pub trait CheckApi: Send + Sync {
    /// Create or replace the check with the same id
    async fn register_check(&self, check: &CheckRegistration) -> Result<(), AgentError>;

    async fn deregister_check(&self, check_id: &str) -> Result<(), AgentError>;
}
