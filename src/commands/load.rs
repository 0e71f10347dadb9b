use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use tracing::info;

use super::{default_table_and_key, print_header, records_are_tagged};
use crate::batch::{TieBreak, UpsertSummary, Upserter};
use crate::domain::{KeySpec, Record, RecordSink};
use crate::errors::EtlError;
use crate::infrastructure::checkpoint_store::read_records;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig};
use crate::infrastructure::memory_sink::MemorySink;
use crate::infrastructure::rest_sink::RestSink;

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Checkpoint JSON produced by `fetch-mentions`
    #[arg(long)]
    pub input: PathBuf,

    /// Sink table (default: the by-tag table when records carry `tag`)
    #[arg(long)]
    pub table: Option<String>,

    /// Comma-separated natural key, also the `on_conflict` target
    /// (default: `date,[tag,]concept,model,brand`)
    #[arg(long)]
    pub key_fields: Option<String>,

    /// Survivor rule for duplicate keys: `first` or `max:<field>`
    #[arg(long, default_value = "max:mentions")]
    pub keep: String,

    /// Rows per upsert request (default: sink.batch_size)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Deduplicate and count without writing to the sink
    #[arg(long)]
    pub dry_run: bool,
}

/// Reads the checkpoint, failing with a hint when it has not been produced yet.
pub async fn read_input(path: &std::path::Path) -> anyhow::Result<Vec<Record>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        bail!(
            "Input file not found: {}. Run `visibility-etl fetch-mentions` first.",
            path.display()
        );
    }
    read_records(path)
        .await
        .with_context(|| format!("Loading {}", path.display()))
}

/// Table and key for `records`: explicit flags win, otherwise the tagged
/// defaults apply when any record carries a `tag`.
#[must_use]
pub fn resolve_target(args: &LoadArgs, records: &[Record]) -> (String, KeySpec) {
    let (table, key) = default_table_and_key(records_are_tagged(records));
    (
        args.table.clone().unwrap_or_else(|| table.to_string()),
        args.key_fields.as_deref().map_or(key, KeySpec::parse),
    )
}

pub async fn run(args: &LoadArgs, config: &AppConfig) -> anyhow::Result<()> {
    if args.key_fields.as_deref().is_some_and(|f| KeySpec::parse(f).is_empty()) {
        return Err(EtlError::Config("--key-fields must name at least one field".to_string()).into());
    }
    let keep: TieBreak = args.keep.parse()?;
    let batch_size = args.batch_size.unwrap_or(config.sink.batch_size);
    if batch_size == 0 {
        return Err(EtlError::Config("--batch-size must be greater than 0".to_string()).into());
    }
    let credentials = if args.dry_run {
        None
    } else {
        Some(config.sink.credentials()?)
    };

    let records = read_input(&args.input).await?;
    info!("Loaded {} records from {}", records.len(), args.input.display());
    let (table, key) = resolve_target(args, &records);

    let sink: Box<dyn RecordSink> = match credentials {
        None => Box::new(MemorySink::new()),
        Some((url, sink_key)) => {
            let client = Arc::new(HttpClient::new(HttpClientConfig::from_batch_config(&config.batch))?);
            Box::new(RestSink::new(
                client,
                url,
                sink_key,
                table.clone(),
                config.sink.read_page_size,
            ))
        }
    };

    let upserter = Upserter::new(key, keep, batch_size);
    let summary = upserter.upsert(records, sink.as_ref()).await;

    report(args.dry_run, &table, &summary);
    if !summary.failed.is_empty() {
        bail!("{} of {} batches failed", summary.failed.len(), summary.batches);
    }
    Ok(())
}

fn report(dry_run: bool, table: &str, summary: &UpsertSummary) {
    if dry_run {
        print_header(&format!("Dry run: {table} (nothing written)"));
    } else {
        print_header(&format!("Load into {table}"));
    }
    print!("{summary}");
}
