//! JSON checkpoint file holding every accumulated record.
//!
//! Saves write a sibling temp file and rename it over the target, so a crash
//! mid-save leaves the previous checkpoint readable.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{CompletionKey, CompletionSpec, Record};
use crate::errors::EtlError;

/// Records from a previous run plus the completion keys derived from them.
#[derive(Debug, Default)]
pub struct CheckpointState {
    pub records: Vec<Record>,
    pub completed: HashSet<CompletionKey>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// An absent checkpoint loads as empty state.
    async fn load(&self) -> Result<CheckpointState, EtlError>;

    /// Replaces the stored snapshot with `records`.
    async fn save(&self, records: &[Record]) -> Result<(), EtlError>;

    fn location(&self) -> String;
}

pub struct JsonFileCheckpoint {
    path: PathBuf,
    completion: CompletionSpec,
}

impl JsonFileCheckpoint {
    pub fn new(path: impl Into<PathBuf>, completion: CompletionSpec) -> Self {
        Self {
            path: path.into(),
            completion,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!("temp_{}.tmp", Uuid::new_v4()))
    }
}

/// Reads a checkpoint file without deriving completion keys.
pub async fn read_records(path: &Path) -> Result<Vec<Record>, EtlError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        EtlError::Persistence(format!("Failed to read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        EtlError::Persistence(format!("Checkpoint {} is not a record list: {e}", path.display()))
    })
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpoint {
    async fn load(&self) -> Result<CheckpointState, EtlError> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!("No checkpoint at {}", self.path.display());
            return Ok(CheckpointState::default());
        }

        let records = read_records(&self.path).await?;
        let mut completed = HashSet::new();
        let mut unkeyed = 0usize;
        for record in &records {
            match self.completion.key_for_record(record) {
                Some(key) => {
                    completed.insert(key);
                }
                None => unkeyed += 1,
            }
        }
        if unkeyed > 0 {
            warn!(
                "{} checkpoint records lack completion fields and were ignored for resume",
                unkeyed
            );
        }

        Ok(CheckpointState { records, completed })
    }

    async fn save(&self, records: &[Record]) -> Result<(), EtlError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                EtlError::Persistence(format!("Failed to create {}: {e}", dir.display()))
            })?;
        }

        let body = serde_json::to_vec_pretty(records)
            .map_err(|e| EtlError::Persistence(format!("Failed to encode checkpoint: {e}")))?;

        let temp = self.temp_path();
        if let Err(e) = tokio::fs::write(&temp, &body).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(EtlError::Persistence(format!(
                "Failed to write {}: {e}",
                temp.display()
            )));
        }
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(EtlError::Persistence(format!(
                "Failed to replace {}: {e}",
                self.path.display()
            )));
        }

        debug!("Checkpoint saved: {} records -> {}", records.len(), self.path.display());
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
