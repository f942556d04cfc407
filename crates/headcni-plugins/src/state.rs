//! Persisted chain state
//!
//! Everything needed to reverse an ADD lives in the data directory:
//!
//! - `<container-id>-delegate`: the resolved delegate configuration
//! - `<container-id>-plugin-<index>`: one [`PluginState`] per committed step
//!
//! Files are replaced atomically (write temp, fsync, rename) so a reader
//! never observes a partial write. Nothing is cached: every call reads the
//! directory, which is the only source of truth across invocations.

use chrono::{DateTime, Utc};
use headcni_core::{Document, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

/// One committed step of a plugin chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginState {
    pub index: usize,

    #[serde(rename = "type")]
    pub plugin_type: String,

    /// Fully merged configuration the step was run with
    pub config: Value,

    pub timestamp: DateTime<Utc>,

    /// Handled by headcni's own delegate logic
    #[serde(default)]
    pub self_step: bool,
}

impl PluginState {
    pub fn new(index: usize, plugin_type: impl Into<String>, config: Document, self_step: bool) -> Self {
        Self {
            index,
            plugin_type: plugin_type.into(),
            config: config.into_value(),
            timestamp: Utc::now(),
            self_step,
        }
    }

    pub fn config_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.config)?)
    }

    /// The plugin binary that actually ran: a self step records the
    /// delegate's type inside its config.
    pub fn delegate_type(&self) -> Result<String> {
        if !self.self_step {
            return Ok(self.plugin_type.clone());
        }
        let config = Document::from_value(self.config.clone())?;
        Ok(config.require_str("type")?.to_string())
    }
}

/// File-backed store for delegate snapshots and chain step state
#[derive(Debug)]
pub struct StateStore {
    data_dir: PathBuf,
    lock: RwLock<()>,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn delegate_path(&self, container_id: &str) -> Result<PathBuf> {
        validate_container_id(container_id)?;
        Ok(self.data_dir.join(format!("{}-delegate", container_id)))
    }

    pub fn plugin_path(&self, container_id: &str, index: usize) -> Result<PathBuf> {
        validate_container_id(container_id)?;
        Ok(self
            .data_dir
            .join(format!("{}-plugin-{}", container_id, index)))
    }

    // ========================================================================
    // Delegate snapshot
    // ========================================================================

    pub async fn save_delegate(&self, container_id: &str, config: &[u8]) -> Result<()> {
        let path = self.delegate_path(container_id)?;
        let _guard = self.lock.write().await;
        self.ensure_data_dir().await?;
        write_atomic(&path, config).await
    }

    /// Read the snapshot; `None` when it was never written or already removed
    pub async fn load_delegate(&self, container_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.delegate_path(container_id)?;
        let _guard = self.lock.read().await;
        read_optional(&path).await
    }

    pub async fn remove_delegate(&self, container_id: &str) -> Result<()> {
        let path = self.delegate_path(container_id)?;
        let _guard = self.lock.write().await;
        remove_optional(&path).await
    }

    // ========================================================================
    // Chain step state
    // ========================================================================

    pub async fn save_plugin_state(&self, container_id: &str, state: &PluginState) -> Result<()> {
        let path = self.plugin_path(container_id, state.index)?;
        let data = serde_json::to_vec(state)?;
        let _guard = self.lock.write().await;
        self.ensure_data_dir().await?;
        write_atomic(&path, &data).await?;
        debug!(container_id, index = state.index, plugin_type = %state.plugin_type, "Saved plugin state");
        Ok(())
    }

    pub async fn load_plugin_state(&self, container_id: &str, index: usize) -> Result<Option<PluginState>> {
        let path = self.plugin_path(container_id, index)?;
        let _guard = self.lock.read().await;
        match read_optional(&path).await? {
            Some(data) => serde_json::from_slice(&data).map(Some).map_err(|e| {
                Error::state(format!("corrupt state file {}: {}", path.display(), e))
            }),
            None => Ok(None),
        }
    }

    pub async fn remove_plugin_state(&self, container_id: &str, index: usize) -> Result<()> {
        let path = self.plugin_path(container_id, index)?;
        let _guard = self.lock.write().await;
        remove_optional(&path).await
    }

    /// Number of contiguous step files starting at index 0
    pub async fn chain_len(&self, container_id: &str) -> Result<usize> {
        let _guard = self.lock.read().await;
        let mut len = 0;
        while tokio::fs::try_exists(self.plugin_path(container_id, len)?).await? {
            len += 1;
        }
        Ok(len)
    }

    async fn ensure_data_dir(&self) -> Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(&self.data_dir).await.map_err(|e| {
            Error::state(format!(
                "failed to create data directory {}: {}",
                self.data_dir.display(),
                e
            ))
        })
    }
}

/// Reject IDs that could escape the data directory
fn validate_container_id(container_id: &str) -> Result<()> {
    if container_id.is_empty() {
        return Err(Error::InvalidContainerId("container id cannot be empty".to_string()));
    }
    if container_id.contains('/')
        || container_id.contains('\\')
        || container_id.contains("..")
        || container_id.chars().any(|c| c.is_control())
    {
        return Err(Error::InvalidContainerId(format!(
            "container id contains invalid characters: {:?}",
            container_id
        )));
    }
    Ok(())
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let written: std::io::Result<()> = async {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::state(format!("failed to write {}: {}", path.display(), e)));
    }
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::state(format!("failed to read {}: {}", path.display(), e))),
    }
}

async fn remove_optional(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::state(format!("failed to remove {}: {}", path.display(), e))),
    }
}
