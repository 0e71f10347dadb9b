//! Infrastructure layer for configuration, logging, HTTP and persistence
//!
//! Checkpoint files, the REST table sink, the dry-run memory sink and CSV
//! export live here; the batch layer only sees their traits.

pub mod checkpoint_store; // Atomic JSON checkpoint file
pub mod config; // Layered configuration and defaults
pub mod csv_export;
pub mod http_client; // reqwest + governor
pub mod logging; // Logging infrastructure
pub mod memory_sink;
pub mod rest_sink; // PostgREST upserts and keyed reads

// Re-export commonly used items
pub use checkpoint_store::{CheckpointState, CheckpointStore, JsonFileCheckpoint};
pub use config::AppConfig;
pub use http_client::{HttpClient, HttpClientConfig};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use memory_sink::MemorySink;
pub use rest_sink::RestSink;
