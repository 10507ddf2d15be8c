//! HTTP client for the Consul agent and KV APIs

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::StatusCode;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, error, warn};
use url::Url;

use crate::consul::kv::{
    CheckApi, CheckRegistration, KeyValueStore, KvEntry, ServiceCatalogue, ServiceRegistration,
};
use crate::errors::AgentError;
use crate::models::service::CatalogueEntry;
use crate::storage::settings::ConsulSettings;
use crate::utils::{calc_exp_backoff, CooldownOptions};

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection options for [`ConsulClient`]
#[derive(Debug, Clone)]
pub struct ConsulOptions {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub acl_token: Option<String>,

    /// Server-side wait for blocking queries
    pub wait: Duration,

    /// Backoff between retries of transient failures
    pub cooldown: CooldownOptions,

    pub max_retries: u32,
}

impl Default for ConsulOptions {
    fn default() -> Self {
        Self::from(&ConsulSettings::default())
    }
}

impl From<&ConsulSettings> for ConsulOptions {
    fn from(settings: &ConsulSettings) -> Self {
        Self {
            scheme: settings.scheme.clone(),
            host: settings.host.clone(),
            port: settings.port,
            acl_token: settings.acl_token.clone(),
            wait: Duration::from_secs(settings.wait_secs),
            cooldown: CooldownOptions::default(),
            max_retries: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawKvEntry {
    key: String,
    #[serde(default)]
    value: Option<String>,
    modify_index: u64,
}

/// Consul client implementing the store, catalogue and check interfaces
pub struct ConsulClient {
    client: Client,
    base_url: Url,
    token: Option<SecretString>,
    wait: Duration,
    cooldown: CooldownOptions,
    max_retries: u32,
}

impl ConsulClient {
    /// Create a new Consul client
    pub fn new(options: &ConsulOptions) -> Result<Self, AgentError> {
        let base_url = Url::parse(&format!(
            "{}://{}:{}/v1/",
            options.scheme, options.host, options.port
        ))
        .map_err(|e| AgentError::ConfigError(format!("Invalid Consul address: {}", e)))?;

        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url,
            token: options.acl_token.clone().map(SecretString::from),
            wait: options.wait,
            cooldown: options.cooldown.clone(),
            max_retries: options.max_retries,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, path: &str) -> Result<Url, AgentError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| AgentError::StoreError(format!("Invalid path {}: {}", path, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token.expose_secret()),
            None => request,
        }
    }

    /// Send a request, retrying connection failures and 5xx responses
    async fn send<F>(&self, build: F) -> Result<Response, AgentError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let err = match self.authorize(build()).send().await {
                Ok(response) if response.status().is_server_error() => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    AgentError::StoreError(format!("{}: {}", status, body))
                }
                Ok(response) => return Ok(response),
                Err(e) => AgentError::HttpError(e),
            };

            if !err.is_transient() || attempt >= self.max_retries {
                error!("Consul request failed after {} attempt(s): {}", attempt + 1, err);
                return Err(match err {
                    AgentError::HttpError(e) => AgentError::StoreError(e.to_string()),
                    other => other,
                });
            }

            let delay = calc_exp_backoff(&self.cooldown, attempt);
            warn!("Consul request failed: {}, retrying in {:?}", err, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn ensure_success(response: Response) -> Result<Response, AgentError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::StoreError(format!("{}: {}", status, body)))
    }

    fn index_of(response: &Response) -> Option<u64> {
        response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Probe the local agent
    pub async fn check_connectivity(&self) -> Result<(), AgentError> {
        let url = self.url("agent/self")?;
        debug!("GET {}", url);
        let response = self
            .send(|| self.client.get(url.clone()).timeout(REQUEST_TIMEOUT))
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for ConsulClient {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, AgentError> {
        let url = self.url(&format!("kv/{}", key))?;
        debug!("GET {}", url);
        let response = self
            .send(|| self.client.get(url.clone()).timeout(REQUEST_TIMEOUT))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entries: Vec<RawKvEntry> = Self::ensure_success(response).await?.json().await?;

        let Some(raw) = entries.into_iter().next() else {
            return Ok(None);
        };
        let value = match raw.value {
            Some(encoded) => {
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| AgentError::StoreError(format!("Undecodable value at {}: {}", key, e)))?;
                String::from_utf8(bytes)
                    .map_err(|e| AgentError::StoreError(format!("Non UTF-8 value at {}: {}", key, e)))?
            }
            None => String::new(),
        };
        Ok(Some(KvEntry {
            key: raw.key,
            value,
            modify_index: raw.modify_index,
        }))
    }

    async fn put(&self, key: &str, value: &str, cas: Option<u64>) -> Result<bool, AgentError> {
        let url = self.url(&format!("kv/{}", key))?;
        debug!("PUT {} (cas: {:?})", url, cas);
        let response = self
            .send(|| {
                let mut request = self
                    .client
                    .put(url.clone())
                    .timeout(REQUEST_TIMEOUT)
                    .body(value.to_string());
                if let Some(index) = cas {
                    request = request.query(&[("cas", index)]);
                }
                request
            })
            .await?;
        let body = Self::ensure_success(response).await?.text().await?;
        Ok(body.trim() == "true")
    }

    async fn find_keys(&self, prefix: &str) -> Result<Vec<String>, AgentError> {
        let url = self.url(&format!("kv/{}", prefix))?;
        debug!("GET {}?keys", url);
        let response = self
            .send(|| {
                self.client
                    .get(url.clone())
                    .timeout(REQUEST_TIMEOUT)
                    .query(&[("keys", "")])
            })
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let keys = Self::ensure_success(response).await?.json().await?;
        Ok(keys)
    }

    async fn current_index(&self, prefix: &str) -> Result<Option<u64>, AgentError> {
        let url = self.url(&format!("kv/{}", prefix))?;
        let response = self
            .send(|| {
                self.client
                    .get(url.clone())
                    .timeout(REQUEST_TIMEOUT)
                    .query(&[("keys", "")])
            })
            .await?;
        Ok(Self::index_of(&response))
    }

    async fn blocking_wait(&self, prefix: &str, last_index: u64) -> Result<u64, AgentError> {
        let url = self.url(&format!("kv/{}", prefix))?;
        let wait = format!("{}s", self.wait.as_secs());
        debug!("Blocking on {} from index {}", url, last_index);
        let response = self
            .send(|| {
                self.client
                    .get(url.clone())
                    .timeout(self.wait + REQUEST_TIMEOUT)
                    .query(&[("keys", ""), ("index", &last_index.to_string()), ("wait", &wait)])
            })
            .await?;
        Self::index_of(&response).ok_or_else(|| {
            AgentError::StoreError(format!("Blocking query on {} returned no index", prefix))
        })
    }
}

#[async_trait]
impl ServiceCatalogue for ConsulClient {
    async fn registered_services(&self) -> Result<Vec<CatalogueEntry>, AgentError> {
        let url = self.url("agent/services")?;
        debug!("GET {}", url);
        let response = self
            .send(|| self.client.get(url.clone()).timeout(REQUEST_TIMEOUT))
            .await?;
        let services: BTreeMap<String, CatalogueEntry> =
            Self::ensure_success(response).await?.json().await?;
        Ok(services.into_values().collect())
    }

    async fn register_service(&self, registration: &ServiceRegistration) -> Result<(), AgentError> {
        let url = self.url("agent/service/register")?;
        debug!("PUT {} ({})", url, registration.id);
        let response = self
            .send(|| {
                self.client
                    .put(url.clone())
                    .timeout(REQUEST_TIMEOUT)
                    .json(registration)
            })
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> Result<(), AgentError> {
        let url = self.url(&format!("agent/service/deregister/{}", service_id))?;
        debug!("PUT {}", url);
        let response = self
            .send(|| self.client.put(url.clone()).timeout(REQUEST_TIMEOUT))
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl CheckApi for ConsulClient {
    async fn register_check(&self, check: &CheckRegistration) -> Result<(), AgentError> {
        let url = self.url("agent/check/register")?;
        debug!("PUT {} ({})", url, check.id);
        let response = self
            .send(|| self.client.put(url.clone()).timeout(REQUEST_TIMEOUT).json(check))
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn deregister_check(&self, check_id: &str) -> Result<(), AgentError> {
        let url = self.url(&format!("agent/check/deregister/{}", check_id))?;
        debug!("PUT {}", url);
        let response = self
            .send(|| self.client.put(url.clone()).timeout(REQUEST_TIMEOUT))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Check {} was not registered", check_id);
            return Ok(());
        }
        Self::ensure_success(response).await?;
        Ok(())
    }
}
