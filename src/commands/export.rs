use std::cmp::Ordering;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use super::{default_table_and_key, print_header, records_are_tagged};
use crate::batch::{TieBreak, dedup};
use crate::domain::{KeySpec, Record};
use crate::infrastructure::csv_export::write_csv_file;

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Checkpoint JSON to export
    #[arg(long)]
    pub input: PathBuf,

    /// CSV destination (default: input path with a .csv extension)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Deduplicate on these comma-separated fields before writing
    /// (default: `date,[tag,]concept,model,brand`)
    #[arg(long)]
    pub key_fields: Option<String>,

    /// Survivor rule for duplicate keys: `first` or `max:<field>`
    #[arg(long, default_value = "max:mentions")]
    pub keep: String,

    /// Sort rows descending by this numeric field
    #[arg(long)]
    pub sort_by: Option<String>,
}

/// Descending by `field`; rows without a numeric value go last. Stable.
pub fn sort_descending(records: &mut [Record], field: &str) {
    records.sort_by(|a, b| match (a.number(field), b.number(field)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

pub fn run(args: &ExportArgs) -> anyhow::Result<()> {
    let keep: TieBreak = args.keep.parse()?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("csv"));

    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Reading {}", args.input.display()))?;
    let mut records: Vec<Record> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a record list", args.input.display()))?;
    let input = records.len();

    let key = match args.key_fields.as_deref() {
        Some(fields) => KeySpec::parse(fields),
        None => default_table_and_key(records_are_tagged(&records)).1,
    };
    records = dedup(records, &key, &keep);
    if let Some(field) = &args.sort_by {
        sort_descending(&mut records, field);
    }

    write_csv_file(&output, &records).with_context(|| format!("Writing {}", output.display()))?;
    info!("Exported {} rows to {}", records.len(), output.display());

    print_header("CSV export");
    println!("Records in:        {input}");
    println!("Rows written:      {}", records.len());
    println!("Output:            {}", output.display());
    Ok(())
}
