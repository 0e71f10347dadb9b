//! Configuration infrastructure
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables prefixed with `VISIBILITY_ETL` (nested keys
//! separated by `__`, e.g. `VISIBILITY_ETL_BATCH__WORKERS=8`). Credentials
//! are additionally read from their conventional unprefixed names.
//!
//! The resulting `AppConfig` is built once at process start and handed to
//! each component by reference.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::EtlError;

/// Environment prefix for layered settings.
pub const ENV_PREFIX: &str = "VISIBILITY_ETL";

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "visibility-etl.toml";

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub semrush: SemrushConfig,
    pub sink: SinkConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
    /// Ordered tag groups selectable with `--group` / `--all`.
    pub tag_groups: Vec<TagGroup>,
}

/// SEMrush AI-visibility element endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SemrushConfig {
    pub base_url: String,
    pub workspace_id: String,
    pub project_id: String,
    /// Element queried for concept mentions
    pub element_id: String,
    pub api_key: Option<Secret>,
    /// Models fetched when `--model` is not given
    pub models: Vec<String>,
    /// Brands fetched when `--brand` is not given
    pub brands: Vec<String>,
    /// Rows requested per pagination call
    pub page_size: usize,
}

/// REST-accessible Postgres sink (PostgREST conventions)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Project URL; the REST root is `{url}/rest/v1`
    pub url: Option<String>,
    pub key: Option<Secret>,
    /// Records per upsert request
    pub batch_size: usize,
    /// Rows per paginated read
    pub read_page_size: usize,
}

/// Dispatcher and rate-limit settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker pool size (max in-flight requests)
    pub workers: usize,
    /// Minimum delay each worker observes before every request
    pub request_delay_ms: u64,
    /// Process-wide request ceiling; 0 disables the limiter
    pub max_requests_per_second: u32,
    pub request_timeout_seconds: u64,
    /// Checkpoint cadence in completed tasks
    pub checkpoint_every: usize,
    /// Circuit breaker trips once errors exceed this count
    pub error_threshold: usize,
    /// Directory for default checkpoint files
    pub data_dir: PathBuf,
}

/// Logging configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `<data_local_dir>/visibility-etl/logs`
    pub log_dir: Option<PathBuf>,
    /// Module-specific level overrides (e.g. "reqwest": "warn")
    pub module_filters: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TagGroup {
    pub name: String,
    pub tags: Vec<String>,
}

impl Default for SemrushConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::SEMRUSH_BASE_URL.to_string(),
            workspace_id: String::new(),
            project_id: String::new(),
            element_id: String::new(),
            api_key: None,
            models: defaults::MODELS.iter().map(ToString::to_string).collect(),
            brands: vec![defaults::BRAND.to_string()],
            page_size: defaults::PAGE_SIZE,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: None,
            key: None,
            batch_size: defaults::UPSERT_BATCH_SIZE,
            read_page_size: defaults::PAGE_SIZE,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            request_delay_ms: defaults::REQUEST_DELAY_MS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            checkpoint_every: defaults::CHECKPOINT_EVERY,
            error_threshold: defaults::ERROR_THRESHOLD,
            data_dir: PathBuf::from(defaults::DATA_DIR),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            log_dir: None,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("reqwest".to_string(), "warn".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("h2".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl SemrushConfig {
    /// API key, or a `Config` error naming the variable to set.
    pub fn api_key(&self) -> Result<&str, EtlError> {
        self.api_key
            .as_ref()
            .map(Secret::expose)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EtlError::Config("SEMRUSH_API_KEY not set".to_string()))
    }

    /// Checks everything a fetch needs before any network call is made.
    pub fn require_fetch_settings(&self) -> Result<(), EtlError> {
        self.api_key()?;
        for (name, value) in [
            ("semrush.workspace_id", &self.workspace_id),
            ("semrush.project_id", &self.project_id),
            ("semrush.element_id", &self.element_id),
        ] {
            if value.trim().is_empty() {
                return Err(EtlError::Config(format!("{name} not set")));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn element_url(&self) -> String {
        format!(
            "{}/workspaces/{}/products/ai/elements/{}",
            self.base_url.trim_end_matches('/'),
            self.workspace_id,
            self.element_id
        )
    }
}

impl SinkConfig {
    /// Project URL and key, or a `Config` error naming what is missing.
    pub fn credentials(&self) -> Result<(&str, &str), EtlError> {
        let url = self
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| EtlError::Config("SUPABASE_URL not set".to_string()))?;
        let key = self
            .key
            .as_ref()
            .map(Secret::expose)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EtlError::Config("SUPABASE_KEY not set".to_string()))?;
        Ok((url, key))
    }
}

impl AppConfig {
    /// Loads defaults < file < environment. An explicit path must exist; the
    /// default lookup (working directory, then user config dir) is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, EtlError> {
        let mut builder = config::Config::builder();

        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(EtlError::Config(format!(
                        "Config file not found: {}",
                        p.display()
                    )));
                }
                builder = builder.add_source(config::File::from(p));
            }
            None => {
                for candidate in Self::default_locations() {
                    builder = builder.add_source(config::File::from(candidate).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| EtlError::Config(e.to_string()))?;

        let mut config: Self = settings
            .try_deserialize()
            .map_err(|e| EtlError::Config(e.to_string()))?;
        config.apply_env_credentials(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Files that `load(path)` reads, in layering order. Runs before logging
    /// is set up, so callers log the result once the subscriber exists.
    #[must_use]
    pub fn config_sources(path: Option<&Path>) -> Vec<PathBuf> {
        match path {
            Some(p) => vec![p.to_path_buf()],
            None => Self::default_locations()
                .into_iter()
                .filter(|candidate| candidate.is_file())
                .collect(),
        }
    }

    /// User config dir first so a file in the working directory wins.
    fn default_locations() -> Vec<PathBuf> {
        let mut locations = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            locations.push(dir.join("visibility-etl").join("config.toml"));
        }
        locations.push(PathBuf::from(DEFAULT_CONFIG_FILE));
        locations
    }

    /// Fills credentials left empty by the layered sources from their
    /// conventional variable names.
    pub fn apply_env_credentials<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.semrush.api_key.is_none() {
            self.semrush.api_key = lookup("SEMRUSH_API_KEY").map(Secret::new);
        }
        if self.sink.url.is_none() {
            self.sink.url = lookup("SUPABASE_URL");
        }
        if self.sink.key.is_none() {
            self.sink.key = lookup("SUPABASE_KEY").map(Secret::new);
        }
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        let checks = [
            ("batch.workers", self.batch.workers),
            ("batch.checkpoint_every", self.batch.checkpoint_every),
            ("sink.batch_size", self.sink.batch_size),
            ("sink.read_page_size", self.sink.read_page_size),
            ("semrush.page_size", self.semrush.page_size),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(EtlError::Config(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }

    /// Tags for the selected groups, in configured group order. `all`
    /// selects every group; duplicates are dropped.
    pub fn tags_for_groups(&self, groups: &[String], all: bool) -> Result<Vec<String>, EtlError> {
        for name in groups {
            if !self.tag_groups.iter().any(|g| &g.name == name) {
                let known: Vec<&str> = self.tag_groups.iter().map(|g| g.name.as_str()).collect();
                return Err(EtlError::Config(format!(
                    "Unknown tag group '{name}' (known: {})",
                    known.join(", ")
                )));
            }
        }

        let mut tags: Vec<String> = Vec::new();
        for group in &self.tag_groups {
            if all || groups.contains(&group.name) {
                for tag in &group.tags {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
            }
        }
        Ok(tags)
    }
}

/// Default values used across the application
pub mod defaults {
    pub const SEMRUSH_BASE_URL: &str = "https://api.semrush.com/apis/v4-raw/external-api/v1";

    pub const MODELS: &[&str] = &["search-gpt", "google-ai-overview", "google-ai-mode"];

    pub const BRAND: &str = "Samsung";

    /// Rows per pagination call (vendor and sink reads)
    pub const PAGE_SIZE: usize = 1000;

    pub const WORKERS: usize = 5;

    pub const REQUEST_DELAY_MS: u64 = 300;

    pub const MAX_REQUESTS_PER_SECOND: u32 = 10;

    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    pub const CHECKPOINT_EVERY: usize = 20;

    pub const ERROR_THRESHOLD: usize = 50;

    pub const UPSERT_BATCH_SIZE: usize = 500;

    pub const DATA_DIR: &str = "data";

    pub const LOG_LEVEL: &str = "info";

    pub const LOG_JSON_FORMAT: bool = false;

    pub const LOG_CONSOLE_OUTPUT: bool = true;

    pub const LOG_FILE_OUTPUT: bool = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn groups() -> AppConfig {
        AppConfig {
            tag_groups: vec![
                TagGroup {
                    name: "tv-features".into(),
                    tags: vec!["TV Features__AI".into(), "TV Features__HDR".into()],
                },
                TagGroup {
                    name: "tv-sizes".into(),
                    tags: vec!["TV Sizes__Large Size".into(), "TV Features__AI".into()],
                },
            ],
            ..AppConfig::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.workers, 5);
        assert_eq!(config.batch.checkpoint_every, 20);
        assert_eq!(config.sink.batch_size, 500);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = AppConfig::default();
        config.batch.workers = 0;
        assert!(matches!(config.validate(), Err(EtlError::Config(_))));
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let config = AppConfig::default();
        let err = config.semrush.require_fetch_settings().unwrap_err();
        assert!(err.to_string().contains("SEMRUSH_API_KEY"));
    }

    #[test]
    fn env_credentials_fill_gaps_only() {
        let mut config = AppConfig::default();
        config.sink.url = Some("https://configured.example".into());
        config.apply_env_credentials(|name| match name {
            "SEMRUSH_API_KEY" => Some("k1".into()),
            "SUPABASE_URL" => Some("https://env.example".into()),
            "SUPABASE_KEY" => Some("k2".into()),
            _ => None,
        });
        assert_eq!(config.semrush.api_key().unwrap(), "k1");
        let (url, key) = config.sink.credentials().unwrap();
        assert_eq!(url, "https://configured.example");
        assert_eq!(key, "k2");
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.semrush.api_key = Some(Secret::new("super-secret"));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn group_selection_keeps_order_and_dedupes() {
        let config = groups();
        let all = config.tags_for_groups(&[], true).unwrap();
        assert_eq!(all, vec!["TV Features__AI", "TV Features__HDR", "TV Sizes__Large Size"]);

        let sizes = config.tags_for_groups(&["tv-sizes".into()], false).unwrap();
        assert_eq!(sizes, vec!["TV Sizes__Large Size", "TV Features__AI"]);
    }

    #[test]
    fn unknown_group_is_config_error() {
        let err = groups().tags_for_groups(&["tv-prices".into()], false).unwrap_err();
        assert!(err.to_string().contains("tv-prices"));
    }

    #[test]
    fn config_sources_name_existing_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("custom.toml");
        assert_eq!(AppConfig::config_sources(Some(&explicit)), vec![explicit.clone()]);
        assert!(AppConfig::config_sources(None).iter().all(|p| p.is_file()));
    }

    #[test]
    fn loads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[semrush]
workspace_id = "ws"
project_id = "proj"
element_id = "el"
models = ["search-gpt"]

[batch]
workers = 3
error_threshold = 7

[[tag_groups]]
name = "tv-models"
tags = ["TV Models__OLED", "TV Models__QLED"]
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.batch.workers, 3);
        assert_eq!(config.batch.error_threshold, 7);
        assert_eq!(config.batch.checkpoint_every, defaults::CHECKPOINT_EVERY);
        assert_eq!(config.semrush.models, vec!["search-gpt"]);
        assert_eq!(config.tag_groups[0].tags.len(), 2);
        assert!(config.semrush.element_url().ends_with("/workspaces/ws/products/ai/elements/el"));
    }

    #[test]
    fn explicit_missing_file_is_config_error() {
        let err = AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }
}
