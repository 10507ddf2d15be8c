//! Directory operations

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;

use crate::errors::AgentError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), AgentError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), AgentError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List subdirectories with their creation time.
    ///
    /// Falls back to the modification time where the filesystem does not
    /// record creation.
    pub async fn list_dirs_created(&self) -> Result<Vec<(PathBuf, SystemTime)>, AgentError> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_dir() {
                continue;
            }
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            dirs.push((entry.path(), created));
        }

        Ok(dirs)
    }

    /// Get a file within this directory
    pub fn file(&self, name: impl AsRef<Path>) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: impl AsRef<Path>) -> Dir {
        Dir::new(self.path.join(name))
    }
}

/// Recursively copy `source` into `destination`.
///
/// A file source is copied into the destination directory under its own name.
pub async fn copy_tree(source: &Path, destination: &Path) -> Result<(), AgentError> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || copy_tree_blocking(&source, &destination))
        .await
        .map_err(|e| AgentError::Internal(e.to_string()))?
}

fn copy_tree_blocking(source: &Path, destination: &Path) -> Result<(), AgentError> {
    std::fs::create_dir_all(destination)?;

    if source.is_file() {
        let name = source.file_name().ok_or_else(|| {
            AgentError::ValidationError(format!("Invalid source file {}", source.display()))
        })?;
        std::fs::copy(source, destination.join(name))?;
        return Ok(());
    }

    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree_blocking(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Apply `mode` to `path` and everything below it.
#[cfg(unix)]
pub async fn chmod_recursive(path: &Path, mode: u32) -> Result<(), AgentError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || walk(&path, &mut |p| {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(p, std::fs::Permissions::from_mode(mode))
    }))
    .await
    .map_err(|e| AgentError::Internal(e.to_string()))?
}

/// Change ownership of `path` and everything below it.
#[cfg(unix)]
pub async fn chown_recursive(
    path: &Path,
    uid: Option<u32>,
    gid: Option<u32>,
) -> Result<(), AgentError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || walk(&path, &mut |p| std::os::unix::fs::chown(p, uid, gid)))
        .await
        .map_err(|e| AgentError::Internal(e.to_string()))?
}

#[cfg(unix)]
fn walk(
    path: &Path,
    apply: &mut dyn FnMut(&Path) -> std::io::Result<()>,
) -> Result<(), AgentError> {
    apply(path)?;
    if std::fs::symlink_metadata(path)?.is_dir() {
        for entry in std::fs::read_dir(path)? {
            walk(&entry?.path(), apply)?;
        }
    }
    Ok(())
}
