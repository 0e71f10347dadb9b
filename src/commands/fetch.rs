use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{NaiveDate, Utc};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{default_checkpoint_path, default_table_and_key, print_header};
use crate::batch::{
    DispatchConfig, Dispatcher, PaginatedFetcher, RateLimitedFetcher, RecordAccumulator,
    TaskEnumerator, TieBreak, Upserter,
};
use crate::domain::{CompletionSpec, Dimension, KeySpec, date_range, parse_date};
use crate::errors::EtlError;
use crate::infrastructure::checkpoint_store::{CheckpointState, CheckpointStore, JsonFileCheckpoint};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig};
use crate::infrastructure::rest_sink::RestSink;
use crate::vendors::SemrushConcepts;

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// First day to fetch (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: Option<String>,

    /// Last day to fetch, inclusive (default: today, UTC)
    #[arg(long)]
    pub end_date: Option<String>,

    /// Fetch one day only; overrides --start-date/--end-date
    #[arg(long)]
    pub single_date: Option<String>,

    /// Brand to fetch (repeatable; default: semrush.brands)
    #[arg(long)]
    pub brand: Vec<String>,

    /// AI model to fetch (repeatable; default: semrush.models)
    #[arg(long)]
    pub model: Vec<String>,

    /// Tag group from `tag_groups` (repeatable)
    #[arg(long)]
    pub group: Vec<String>,

    /// Every configured tag group, in configured order
    #[arg(long)]
    pub all: bool,

    /// Explicit tag (repeatable)
    #[arg(long)]
    pub tag: Vec<String>,

    /// Concurrent workers (default: batch.workers)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Continue from the existing checkpoint instead of starting over
    #[arg(long)]
    pub resume: bool,

    /// Skip tasks whose rows already exist in the sink table
    #[arg(long)]
    pub skip_existing: bool,

    /// Print the plan and time estimate without calling any API
    #[arg(long)]
    pub dry_run: bool,

    /// Checkpoint file (default: derived from data_dir and run shape)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Upsert everything into the sink once fetching ends
    #[arg(long)]
    pub load: bool,

    /// Sink table (default depends on whether tags are used)
    #[arg(long)]
    pub table: Option<String>,

    /// Survivor rule for duplicate keys: `first` or `max:<field>`
    #[arg(long, default_value = "max:mentions")]
    pub keep: String,
}

/// Everything a fetch run needs, resolved from flags and configuration.
#[derive(Debug)]
pub struct FetchPlan {
    pub enumerator: TaskEnumerator,
    pub checkpoint_path: PathBuf,
    pub table: String,
    pub key: KeySpec,
    pub keep: TieBreak,
    pub workers: usize,
    pub tagged: bool,
}

fn resolve_dates(args: &FetchArgs, today: NaiveDate) -> Result<Vec<NaiveDate>, EtlError> {
    if let Some(day) = &args.single_date {
        let day = parse_date(day)?;
        return Ok(vec![day]);
    }
    let start = args
        .start_date
        .as_deref()
        .ok_or_else(|| EtlError::Config("--start-date or --single-date is required".to_string()))
        .and_then(parse_date)?;
    let end = match &args.end_date {
        Some(end) => parse_date(end)?,
        None => today,
    };
    date_range(start, end)
}

impl FetchPlan {
    pub fn resolve(args: &FetchArgs, config: &AppConfig, today: NaiveDate) -> Result<Self, EtlError> {
        let dates = resolve_dates(args, today)?;

        let mut tags = config.tags_for_groups(&args.group, args.all)?;
        for tag in &args.tag {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        let tagged = !tags.is_empty();

        let brands = if args.brand.is_empty() {
            config.semrush.brands.clone()
        } else {
            args.brand.clone()
        };
        let models = if args.model.is_empty() {
            config.semrush.models.clone()
        } else {
            args.model.clone()
        };
        if brands.is_empty() || models.is_empty() {
            return Err(EtlError::Config(
                "At least one brand and one model are required".to_string(),
            ));
        }

        let workers = args.workers.unwrap_or(config.batch.workers);
        if workers == 0 {
            return Err(EtlError::Config("--workers must be greater than 0".to_string()));
        }

        let completion = if tagged {
            CompletionSpec::full()
        } else {
            CompletionSpec::new(vec![Dimension::Date, Dimension::Model, Dimension::Brand])
        };

        let checkpoint_path = args
            .output
            .clone()
            .unwrap_or_else(|| default_checkpoint_path(&config.batch.data_dir, tagged, &brands));
        let (default_table, key) = default_table_and_key(tagged);

        Ok(Self {
            enumerator: TaskEnumerator::new(dates, models, brands, tags, completion),
            checkpoint_path,
            table: args.table.clone().unwrap_or_else(|| default_table.to_string()),
            key,
            keep: args.keep.parse()?,
            workers,
            tagged,
        })
    }
}

/// Wall-clock estimate: every task pays the request delay, spread over workers.
#[must_use]
pub fn estimate_duration(tasks: usize, delay: Duration, workers: usize) -> Duration {
    let workers = u32::try_from(workers.max(1)).unwrap_or(u32::MAX);
    let tasks = u32::try_from(tasks).unwrap_or(u32::MAX);
    delay.saturating_mul(tasks) / workers
}

/// Prior progress for a `--resume` run. An unreadable checkpoint is logged
/// and treated as empty, so the run starts from the full product.
pub async fn load_resume_state(store: &dyn CheckpointStore, resume: bool) -> CheckpointState {
    if !resume {
        return CheckpointState::default();
    }
    match store.load().await {
        Ok(state) => state,
        Err(e) => {
            warn!("Could not read checkpoint {}, starting from scratch: {}", store.location(), e);
            CheckpointState::default()
        }
    }
}

pub async fn run(args: &FetchArgs, config: &AppConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let plan = FetchPlan::resolve(args, config, Utc::now().date_naive())?;

    // Every credential is checked before the first request.
    if !args.dry_run {
        config.semrush.require_fetch_settings()?;
        if args.skip_existing || args.load {
            config.sink.credentials()?;
        }
    }

    let store = JsonFileCheckpoint::new(&plan.checkpoint_path, plan.enumerator.completion().clone());
    let state = load_resume_state(&store, args.resume).await;
    let mut completed = state.completed;
    let resumed = completed.len();

    let client = Arc::new(HttpClient::new(HttpClientConfig::from_batch_config(&config.batch))?);
    let sink = if args.dry_run {
        None
    } else if args.skip_existing || args.load {
        let (url, key) = config.sink.credentials()?;
        Some(RestSink::new(
            Arc::clone(&client),
            url,
            key,
            plan.table.clone(),
            config.sink.read_page_size,
        ))
    } else {
        None
    };

    if args.skip_existing {
        match &sink {
            Some(sink) => {
                let existing: HashSet<_> = sink
                    .fetch_existing_keys(plan.enumerator.completion())
                    .await
                    .with_context(|| format!("Reading existing keys from {}", sink.table()))?;
                completed.extend(existing);
            }
            None => info!("Dry run: not reading existing rows from the sink"),
        }
    }

    let tasks = plan.enumerator.enumerate(&completed);
    let skipped = plan.enumerator.total() - tasks.len();

    print_header("Concept mentions fetch");
    println!("Tasks planned:     {}", plan.enumerator.total());
    println!("Already fetched:   {skipped} (checkpoint keys: {resumed})");
    println!("Tasks to fetch:    {}", tasks.len());
    println!("Workers:           {}", plan.workers);
    println!("Checkpoint:        {}", plan.checkpoint_path.display());
    if plan.tagged {
        println!("Table:             {} (tagged)", plan.table);
    } else {
        println!("Table:             {}", plan.table);
    }

    if args.dry_run {
        let eta = estimate_duration(tasks.len(), config.batch.request_delay(), plan.workers);
        println!("Estimated time:    {:.1} minutes", eta.as_secs_f64() / 60.0);
        println!("Dry run: no requests sent");
        return Ok(());
    }

    if tasks.is_empty() {
        println!("Nothing to fetch");
    }

    let source = SemrushConcepts::from_config(Arc::clone(&client), &config.semrush)?;
    let delay = config.batch.request_delay();
    let fetcher = RateLimitedFetcher::new(
        PaginatedFetcher::new(source, config.semrush.page_size, delay),
        delay,
    );

    let accumulator = Arc::new(RecordAccumulator::with_existing(state.records));
    let dispatch_config = DispatchConfig {
        workers: plan.workers,
        ..DispatchConfig::from(&config.batch)
    };
    let summary = Dispatcher::new(Arc::new(fetcher), dispatch_config)
        .with_shutdown(shutdown)
        .run(tasks, Arc::clone(&accumulator), &store)
        .await;

    print_header("Fetch summary");
    print!("{summary}");

    if args.load {
        if summary.interrupted {
            warn!("Interrupted run, skipping load; rerun `load` on {}", store.location());
        } else if let Some(sink) = &sink {
            let upserter = Upserter::new(plan.key.clone(), plan.keep.clone(), config.sink.batch_size);
            let loaded = upserter.upsert(accumulator.snapshot(), sink).await;
            print_header(&format!("Load into {}", sink.table()));
            print!("{loaded}");
            if !loaded.failed.is_empty() {
                bail!("{} of {} batches failed to load", loaded.failed.len(), loaded.batches);
            }
        }
    }

    if summary.tripped {
        bail!(
            "Circuit breaker tripped after {} errors; progress saved to {}",
            summary.errors,
            summary.checkpoint
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::TagGroup;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: FetchArgs,
    }

    fn args(flags: &[&str]) -> FetchArgs {
        let mut argv = vec!["fetch"];
        argv.extend_from_slice(flags);
        Wrapper::parse_from(argv).args
    }

    fn config() -> AppConfig {
        AppConfig {
            tag_groups: vec![TagGroup {
                name: "tv-sizes".into(),
                tags: vec!["TV Sizes__Large Size".into(), "TV Sizes__Small Size".into()],
            }],
            ..AppConfig::default()
        }
    }

    fn today() -> NaiveDate {
        parse_date("2026-02-03").unwrap()
    }

    #[test]
    fn end_date_defaults_to_today() {
        let plan = FetchPlan::resolve(&args(&["--start-date", "2026-02-01"]), &config(), today()).unwrap();
        // 3 days x 3 default models x 1 default brand
        assert_eq!(plan.enumerator.total(), 9);
        assert!(!plan.tagged);
        assert_eq!(plan.table, "semrush_concept_mentions");
        assert_eq!(plan.checkpoint_path, PathBuf::from("data/concept_mentions_samsung.json"));
    }

    #[test]
    fn single_date_overrides_range() {
        let plan = FetchPlan::resolve(
            &args(&["--start-date", "2026-01-01", "--single-date", "2026-01-31", "--model", "m1"]),
            &config(),
            today(),
        )
        .unwrap();
        assert_eq!(plan.enumerator.total(), 1);
    }

    #[test]
    fn groups_and_explicit_tags_make_a_tagged_plan() {
        let plan = FetchPlan::resolve(
            &args(&["--single-date", "2026-01-31", "--group", "tv-sizes", "--tag", "Extra", "--model", "m1"]),
            &config(),
            today(),
        )
        .unwrap();
        assert!(plan.tagged);
        assert_eq!(plan.enumerator.total(), 3);
        assert_eq!(plan.key.on_conflict(), "date,tag,concept,model,brand");
        assert_eq!(plan.table, "semrush_concept_mentions_by_tag");
    }

    #[test]
    fn missing_start_is_a_config_error() {
        let err = FetchPlan::resolve(&args(&[]), &config(), today()).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn unknown_group_is_a_config_error() {
        let err = FetchPlan::resolve(
            &args(&["--single-date", "2026-01-31", "--group", "nope"]),
            &config(),
            today(),
        )
        .unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn bad_keep_rule_is_rejected() {
        assert!(FetchPlan::resolve(
            &args(&["--single-date", "2026-01-31", "--keep", "last"]),
            &config(),
            today()
        )
        .is_err());
    }

    #[test]
    fn estimate_spreads_delay_over_workers() {
        let eta = estimate_duration(100, Duration::from_millis(300), 5);
        assert_eq!(eta, Duration::from_secs(6));
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let mut config = config();
        config.semrush.api_key = None;
        let result = run(
            &args(&["--single-date", "2026-01-31"]),
            &config,
            CancellationToken::new(),
        )
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err.downcast_ref::<EtlError>(), Some(EtlError::Config(_))));
    }

    #[tokio::test]
    async fn truncated_checkpoint_resumes_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concept_mentions.json");
        std::fs::write(&path, "[{\"date\": \"2026-01-31\", \"model\": \"search-gpt\"").unwrap();
        let plan = FetchPlan::resolve(&args(&["--single-date", "2026-01-31"]), &config(), today()).unwrap();
        let store = JsonFileCheckpoint::new(&path, plan.enumerator.completion().clone());

        let state = load_resume_state(&store, true).await;
        assert!(state.records.is_empty() && state.completed.is_empty());
        assert_eq!(
            plan.enumerator.enumerate(&state.completed).len(),
            plan.enumerator.total()
        );
    }

    #[tokio::test]
    async fn resume_reads_saved_progress_and_fresh_runs_ignore_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concept_mentions.json");
        std::fs::write(
            &path,
            r#"[{"date": "2026-01-31", "model": "search-gpt", "brand": "Samsung", "concept": "AI"}]"#,
        )
        .unwrap();
        let plan = FetchPlan::resolve(&args(&["--single-date", "2026-01-31"]), &config(), today()).unwrap();
        let store = JsonFileCheckpoint::new(&path, plan.enumerator.completion().clone());

        assert_eq!(load_resume_state(&store, true).await.completed.len(), 1);
        assert!(load_resume_state(&store, false).await.records.is_empty());
    }
}
