use async_trait::async_trait;

use super::record::{KeySpec, Record};
use crate::errors::EtlError;

/// Destination for deduplicated records. Implementations must merge on the
/// key's fields so that writing the same batch twice leaves one row per key.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn upsert(&self, key: &KeySpec, batch: &[Record]) -> Result<(), EtlError>;
}
