//! Durable result file
//!
//! One JSON object, identifier → record, is both the final output and the
//! resumption state of the next run. Loading never fails; flushing replaces
//! the file in one rename so a crash mid-write leaves the previous
//! checkpoint intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tracing::{debug, info, warn};

use crate::domain::ResultStore;

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prior results, or an empty store when the file is missing or unreadable.
    /// A corrupt file is copied to `<name>.corrupted` first.
    pub async fn load(&self) -> ResultStore {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No checkpoint at {}, starting fresh", self.path.display());
                return ResultStore::new();
            }
            Err(e) => {
                warn!("Failed to read checkpoint {}: {}", self.path.display(), e);
                return ResultStore::new();
            }
        };

        if content.trim().is_empty() {
            warn!("Checkpoint {} is empty, starting fresh", self.path.display());
            return ResultStore::new();
        }

        match serde_json::from_str::<ResultStore>(&content) {
            Ok(store) => {
                info!(
                    "📂 Loaded {} records from {}",
                    store.len(),
                    self.path.display()
                );
                store
            }
            Err(e) => {
                warn!(
                    "Checkpoint {} is corrupted ({}), starting fresh",
                    self.path.display(),
                    e
                );
                self.backup_corrupted().await;
                ResultStore::new()
            }
        }
    }

    /// Write the whole store, replacing the previous checkpoint
    pub async fn flush(&self, store: &ResultStore) -> Result<()> {
        let bytes = to_checkpoint_json(store).context("Failed to serialize result store")?;
        self.write_snapshot(&bytes).await?;

        debug!(
            "💾 Checkpoint written: {} records to {}",
            store.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Replace the checkpoint with bytes from `to_checkpoint_json`
    pub async fn write_snapshot(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let temp_path = self.sibling("tmp");
        tokio::fs::write(&temp_path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| {
                format!(
                    "Failed to move {} over {}",
                    temp_path.display(),
                    self.path.display()
                )
            })?;
        Ok(())
    }

    async fn backup_corrupted(&self) {
        let backup_path = self.sibling("corrupted");
        match tokio::fs::copy(&self.path, &backup_path).await {
            Ok(_) => info!("Corrupted checkpoint kept at {}", backup_path.display()),
            Err(e) => warn!(
                "Failed to back up corrupted checkpoint to {}: {}",
                backup_path.display(),
                e
            ),
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{file_name}.{suffix}"))
    }
}

/// 4-space indented JSON, non-ASCII written verbatim
pub fn to_checkpoint_json(store: &ResultStore) -> serde_json::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    store.serialize(&mut serializer)?;
    Ok(buffer)
}
