//! Command-line surface
//!
//! - `fetch-mentions`: enumerate, fetch concurrently with checkpoints,
//!   optionally upsert at the end
//! - `load`: deduplicate a checkpoint file and upsert it to the sink table
//! - `export-csv`: deduplicate a checkpoint file into a CSV

pub mod export;
pub mod fetch;
pub mod load;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::domain::{KeySpec, Record};
use crate::infrastructure::config::AppConfig;

pub use export::ExportArgs;
pub use fetch::FetchArgs;
pub use load::LoadArgs;

pub const MENTIONS_TABLE: &str = "semrush_concept_mentions";
pub const MENTIONS_BY_TAG_TABLE: &str = "semrush_concept_mentions_by_tag";
pub const MENTIONS_KEY: &str = "date,concept,model,brand";
pub const MENTIONS_BY_TAG_KEY: &str = "date,tag,concept,model,brand";

#[derive(Parser, Debug)]
#[command(
    name = "visibility-etl",
    version,
    about = "Checkpointed batch fetcher for AI-visibility concept mentions"
)]
pub struct Cli {
    /// Path to a TOML config file (default: ./visibility-etl.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides logging.level (e.g. debug)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch concept mentions per date x model x brand (x tag)
    FetchMentions(FetchArgs),
    /// Upsert a checkpoint file into the sink table
    Load(LoadArgs),
    /// Write a checkpoint file as CSV
    ExportCsv(ExportArgs),
}

pub async fn run(command: Command, config: &AppConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    match command {
        Command::FetchMentions(args) => fetch::run(&args, config, shutdown).await,
        Command::Load(args) => load::run(&args, config).await,
        Command::ExportCsv(args) => export::run(&args),
    }
}

/// Table and key used when the caller does not name them.
#[must_use]
pub fn default_table_and_key(tagged: bool) -> (&'static str, KeySpec) {
    if tagged {
        (MENTIONS_BY_TAG_TABLE, KeySpec::parse(MENTIONS_BY_TAG_KEY))
    } else {
        (MENTIONS_TABLE, KeySpec::parse(MENTIONS_KEY))
    }
}

/// True when any record carries a `tag`, i.e. it came from a tagged run.
#[must_use]
pub fn records_are_tagged(records: &[Record]) -> bool {
    records.iter().any(|r| r.key_value("tag").is_some())
}

/// `concept_mentions_by_tag.json` for tagged runs, `concept_mentions_<brand>.json`
/// for a single brand, `concept_mentions.json` otherwise.
#[must_use]
pub fn default_checkpoint_path(data_dir: &Path, tagged: bool, brands: &[String]) -> PathBuf {
    let name = if tagged {
        "concept_mentions_by_tag.json".to_string()
    } else if let [brand] = brands {
        format!("concept_mentions_{}.json", slug(brand))
    } else {
        "concept_mentions.json".to_string()
    };
    data_dir.join(name)
}

fn slug(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn print_header(title: &str) {
    println!("{}", "=".repeat(60));
    println!("{title}");
    println!("{}", "=".repeat(60));
}
