//! Visibility ETL - checkpointed batch fetcher for AI-visibility data
//!
//! Enumerates fetch tasks over date x model x brand (x tag), fetches them
//! through a bounded worker pool with rate limiting and a circuit breaker,
//! checkpoints results to disk, and upserts deduplicated records into a
//! PostgREST table.

// Module declarations
pub mod batch;
pub mod commands;
pub mod domain;
pub mod errors;
pub mod infrastructure;
pub mod vendors;

pub use errors::EtlError;
