//! In-process sink with merge-on-conflict semantics, used for dry runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{CompositeKey, KeySpec, Record, RecordSink};
use crate::errors::EtlError;

#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<HashMap<CompositeKey, Record>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows sorted by key.
    pub fn snapshot(&self) -> Vec<(CompositeKey, Record)> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn upsert(&self, key: &KeySpec, batch: &[Record]) -> Result<(), EtlError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| EtlError::Persistence("memory sink lock poisoned".to_string()))?;
        for record in batch {
            rows.insert(key.key(record), record.clone());
        }
        Ok(())
    }
}
