//! Bundle downloads and deployment log uploads

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::storage::settings::ArtifactSettings;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Object storage addressed by bucket and key
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch `bucket/key` into `destination`. Returns false when the object does not exist.
    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<bool, AgentError>;

    /// Store `source` at `bucket/key`, returning the object URL on success
    async fn upload(&self, bucket: &str, key: &str, source: &Path) -> Result<Option<String>, AgentError>;
}

/// Build the store selected by the settings; a `file://` base URL selects a local directory
pub fn from_settings(settings: &ArtifactSettings) -> Result<Arc<dyn ArtifactStore>, AgentError> {
    let base_url = Url::parse(&settings.base_url)
        .map_err(|e| AgentError::ConfigError(format!("Invalid artifacts base_url: {}", e)))?;

    if base_url.scheme() == "file" {
        let root = base_url.to_file_path().map_err(|_| {
            AgentError::ConfigError(format!("Invalid artifacts directory: {}", base_url))
        })?;
        return Ok(Arc::new(LocalArtifactStore::new(root)));
    }
    Ok(Arc::new(HttpArtifactStore::new(base_url)?))
}

/// Object store reached over HTTP at `<base_url>/<bucket>/<key>`
pub struct HttpArtifactStore {
    client: Client,
    base_url: Url,
}

impl HttpArtifactStore {
    pub fn new(base_url: Url) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?;
        Ok(Self { client, base_url })
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url, AgentError> {
        let path = format!(
            "{}/{}/{}",
            self.base_url.path().trim_end_matches('/'),
            bucket,
            key.trim_start_matches('/')
        );
        let mut url = self.base_url.clone();
        url.set_path(&path);
        Ok(url)
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<bool, AgentError> {
        let url = self.object_url(bucket, key)?;
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(AgentError::ArtifactError(format!(
                "Failed to download {}: HTTP {}",
                url,
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        File::new(destination).write_bytes(&bytes).await?;
        Ok(true)
    }

    async fn upload(&self, bucket: &str, key: &str, source: &Path) -> Result<Option<String>, AgentError> {
        let url = self.object_url(bucket, key)?;
        let body = tokio::fs::read(source).await?;
        debug!("PUT {} ({} bytes)", url, body.len());
        let response = self.client.put(url.clone()).body(body).send().await?;

        if !response.status().is_success() {
            warn!("Upload to {} rejected: HTTP {}", url, response.status());
            return Ok(None);
        }
        Ok(Some(url.to_string()))
    }
}

/// Object store backed by a directory tree, `<root>/<bucket>/<key>`
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<bool, AgentError> {
        let source = self.object_path(bucket, key);
        if !File::new(&source).exists().await {
            return Ok(false);
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, destination).await?;
        Ok(true)
    }

    async fn upload(&self, bucket: &str, key: &str, source: &Path) -> Result<Option<String>, AgentError> {
        let destination = self.object_path(bucket, key);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &destination).await?;
        Ok(Url::from_file_path(&destination).ok().map(String::from))
    }
}

/// Extract a zip archive into `destination`, rejecting entries that escape it
pub async fn extract_zip(archive: &Path, destination: &Path) -> Result<usize, AgentError> {
    let archive = archive.to_path_buf();
    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || extract_zip_blocking(&archive, &destination))
        .await
        .map_err(|e| AgentError::Internal(e.to_string()))?
}

fn extract_zip_blocking(archive: &Path, destination: &Path) -> Result<usize, AgentError> {
    std::fs::create_dir_all(destination)?;
    let reader = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(reader)?;

    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let outpath = match entry.enclosed_name() {
            Some(path) => destination.join(path),
            None => {
                return Err(AgentError::ArtifactError(format!(
                    "Archive entry {} escapes the extraction directory",
                    entry.name()
                )));
            }
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut buffer = Vec::new();
        entry.read_to_end(&mut buffer)?;
        std::fs::File::create(&outpath)?.write_all(&buffer)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
        }
        extracted += 1;
    }
    Ok(extracted)
}
