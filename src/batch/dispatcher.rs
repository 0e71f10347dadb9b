//! # Concurrent Dispatcher
//!
//! A fixed pool of workers pulls tasks from a shared queue and reports each
//! outcome over a channel to a single collector. The collector owns the
//! counters, appends rows to the accumulator, saves a checkpoint every K
//! completions and trips the circuit breaker once errors exceed the
//! threshold. A trip or an external shutdown stops workers from starting
//! new tasks. After a shutdown the collector keeps draining the channel so
//! requests already in flight still reach the final checkpoint; after a trip
//! their outcomes are discarded. The final checkpoint is always written.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::accumulator::RecordAccumulator;
use super::fetcher::Fetcher;
use crate::domain::{Record, Task, TaskId};
use crate::errors::EtlError;
use crate::infrastructure::checkpoint_store::CheckpointStore;
use crate::infrastructure::config::{BatchConfig, defaults};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub workers: usize,
    pub checkpoint_every: usize,
    pub error_threshold: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            checkpoint_every: defaults::CHECKPOINT_EVERY,
            error_threshold: defaults::ERROR_THRESHOLD,
        }
    }
}

impl From<&BatchConfig> for DispatchConfig {
    fn from(batch: &BatchConfig) -> Self {
        Self {
            workers: batch.workers,
            checkpoint_every: batch.checkpoint_every,
            error_threshold: batch.error_threshold,
        }
    }
}

/// Counts reported at the end of a run, including early termination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub planned: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub errors: usize,
    pub rate_limited: usize,
    pub not_started: usize,
    pub new_rows: usize,
    pub total_rows: usize,
    pub checkpoint: String,
    pub checkpoint_failures: usize,
    pub tripped: bool,
    pub interrupted: bool,
}

impl fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tasks planned:     {}", self.planned)?;
        writeln!(f, "Tasks completed:   {}", self.completed)?;
        writeln!(f, "  succeeded:       {}", self.succeeded)?;
        writeln!(
            f,
            "  errored:         {} (rate-limited: {})",
            self.errors, self.rate_limited
        )?;
        writeln!(f, "Not started:       {}", self.not_started)?;
        writeln!(f, "New rows:          {}", self.new_rows)?;
        writeln!(f, "Total rows:        {}", self.total_rows)?;
        writeln!(f, "Checkpoint:        {}", self.checkpoint)?;
        if self.checkpoint_failures > 0 {
            writeln!(f, "Checkpoint saves failed: {}", self.checkpoint_failures)?;
        }
        if self.tripped {
            writeln!(f, "Circuit breaker tripped: too many errors")?;
        }
        if self.interrupted {
            writeln!(f, "Interrupted before completion")?;
        }
        Ok(())
    }
}

struct Outcome {
    id: TaskId,
    task: Task,
    result: Result<Vec<Record>, EtlError>,
}

pub struct Dispatcher {
    fetcher: Arc<dyn Fetcher>,
    config: DispatchConfig,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: DispatchConfig) -> Self {
        Self {
            fetcher,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling `token` stops new tasks from starting; outcomes of tasks
    /// already running are still collected and checkpointed.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub async fn run(
        &self,
        tasks: Vec<Task>,
        accumulator: Arc<RecordAccumulator>,
        store: &dyn CheckpointStore,
    ) -> DispatchSummary {
        let planned = tasks.len();
        let workers = self.config.workers.max(1).min(planned.max(1));
        let checkpoint_every = self.config.checkpoint_every.max(1);

        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let stop = self.shutdown.child_token();
        let (tx, mut rx) = mpsc::channel::<Outcome>(workers * 2);

        info!("🚀 Dispatching {} tasks across {} workers", planned, workers);

        let mut join_set = JoinSet::new();
        for worker_id in 0..workers {
            join_set.spawn(worker(
                worker_id,
                Arc::clone(&self.fetcher),
                Arc::clone(&queue),
                stop.clone(),
                tx.clone(),
            ));
        }
        drop(tx);

        let mut summary = DispatchSummary {
            planned,
            checkpoint: store.location(),
            ..DispatchSummary::default()
        };

        loop {
            let outcome = tokio::select! {
                biased;
                () = self.shutdown.cancelled(), if !summary.interrupted => {
                    warn!("🛑 Shutdown requested, no new tasks will start");
                    summary.interrupted = true;
                    stop.cancel();
                    continue;
                }
                next = rx.recv() => match next {
                    Some(outcome) => outcome,
                    None => break,
                },
            };

            summary.completed += 1;
            let progress = format!("[{}/{}]", summary.completed, planned);
            match outcome.result {
                Ok(rows) => {
                    summary.succeeded += 1;
                    let count = rows.len();
                    accumulator.append(rows);
                    info!("{} {} - {} rows", progress, outcome.task, count);
                }
                Err(e) => {
                    summary.errors += 1;
                    if e.is_rate_limited() {
                        summary.rate_limited += 1;
                    }
                    warn!("{} {} - ERROR: {}", progress, outcome.task, e);
                    debug!("Failed task id {}", outcome.id);
                }
            }

            if summary.completed % checkpoint_every == 0 {
                save_checkpoint(store, &accumulator, &mut summary).await;
            }

            if summary.errors > self.config.error_threshold {
                error!(
                    "⚡ Circuit breaker tripped: {} errors exceed threshold {}",
                    summary.errors, self.config.error_threshold
                );
                summary.tripped = true;
                break;
            }
        }

        // After a trip, in-flight work finishes on its own and is dropped.
        stop.cancel();
        drop(rx);
        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                error!("Worker panicked: {}", e);
            }
        }

        summary.not_started = queue.lock().await.len();
        save_checkpoint(store, &accumulator, &mut summary).await;
        summary.new_rows = accumulator.new_rows();
        summary.total_rows = accumulator.len();

        info!(
            "Dispatch finished: {}/{} completed, {} errors, {} not started",
            summary.completed, planned, summary.errors, summary.not_started
        );
        summary
    }
}

async fn save_checkpoint(
    store: &dyn CheckpointStore,
    accumulator: &RecordAccumulator,
    summary: &mut DispatchSummary,
) {
    let records = accumulator.snapshot();
    match store.save(&records).await {
        Ok(()) => info!("💾 Checkpoint: {} rows saved to {}", records.len(), store.location()),
        Err(e) => {
            summary.checkpoint_failures += 1;
            error!("Checkpoint save failed: {}", e);
        }
    }
}

async fn worker(
    worker_id: usize,
    fetcher: Arc<dyn Fetcher>,
    queue: Arc<Mutex<VecDeque<Task>>>,
    stop: CancellationToken,
    tx: mpsc::Sender<Outcome>,
) {
    debug!("Worker {} started", worker_id);
    loop {
        if stop.is_cancelled() {
            break;
        }
        let Some(task) = queue.lock().await.pop_front() else {
            break;
        };

        let id = TaskId::new();
        debug!("Worker {} took {} ({})", worker_id, task, id);
        let result = fetcher.fetch(&task).await;

        if tx.send(Outcome { id, task, result }).await.is_err() {
            break;
        }
    }
    debug!("Worker {} finished", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompletionSpec, parse_date};
    use crate::infrastructure::checkpoint_store::JsonFileCheckpoint;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FailingFetcher {
        calls: AtomicUsize,
        status: u16,
    }

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, _task: &Task) -> Result<Vec<Record>, EtlError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Err(EtlError::from_status(self.status, "boom"))
        }
    }

    /// Two rows per task, except tasks for model "bad".
    struct MixedFetcher;

    #[async_trait]
    impl Fetcher for MixedFetcher {
        async fn fetch(&self, task: &Task) -> Result<Vec<Record>, EtlError> {
            if task.model == "bad" {
                return Err(EtlError::from_status(500, "bad model"));
            }
            let mut rows = Vec::new();
            for concept in ["AI", "HDR"] {
                let mut r = Record::from_value(json!({ "concept": concept, "mentions": 1 })).unwrap();
                task.stamp(&mut r);
                rows.push(r);
            }
            Ok(rows)
        }
    }

    /// Two rows per task after a fixed delay; counts finished fetches.
    struct SlowFetcher {
        finished: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, task: &Task) -> Result<Vec<Record>, EtlError> {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let rows = MixedFetcher.fetch(task).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            rows
        }
    }

    fn tasks(n: usize, model: &str) -> Vec<Task> {
        let start = parse_date("2025-01-01").unwrap();
        start
            .iter_days()
            .take(n)
            .map(|d| Task::new(d, model, "Samsung", None))
            .collect()
    }

    fn store(dir: &tempfile::TempDir) -> JsonFileCheckpoint {
        JsonFileCheckpoint::new(dir.path().join("cp.json"), CompletionSpec::full())
    }

    #[tokio::test]
    async fn breaker_trips_after_threshold_plus_one_failures() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FailingFetcher {
            calls: AtomicUsize::new(0),
            status: 500,
        });
        let dispatcher = Dispatcher::new(
            fetcher.clone(),
            DispatchConfig {
                workers: 5,
                checkpoint_every: 20,
                error_threshold: 50,
            },
        );

        let summary = dispatcher
            .run(tasks(200, "m1"), Arc::new(RecordAccumulator::new()), &store(&dir))
            .await;

        assert!(summary.tripped);
        assert_eq!(summary.completed, 51);
        assert_eq!(summary.errors, 51);
        assert!(summary.not_started > 0);
        assert!(summary.completed + summary.not_started <= 200);
        assert!(fetcher.calls.load(Ordering::SeqCst) < 200);
        assert!(dir.path().join("cp.json").exists());
    }

    #[tokio::test]
    async fn failures_below_threshold_do_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut work = tasks(10, "m1");
        work.extend(tasks(3, "bad"));
        let acc = Arc::new(RecordAccumulator::new());

        let summary = Dispatcher::new(Arc::new(MixedFetcher), DispatchConfig::default())
            .run(work, Arc::clone(&acc), &store(&dir))
            .await;

        assert!(!summary.tripped);
        assert_eq!(summary.completed, 13);
        assert_eq!(summary.succeeded, 10);
        assert_eq!(summary.errors, 3);
        assert_eq!(summary.not_started, 0);
        assert_eq!(summary.new_rows, 20);
        assert_eq!(acc.len(), 20);
    }

    #[tokio::test]
    async fn rate_limits_are_counted_separately() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FailingFetcher {
            calls: AtomicUsize::new(0),
            status: 429,
        });
        let summary = Dispatcher::new(fetcher, DispatchConfig::default())
            .run(tasks(4, "m1"), Arc::new(RecordAccumulator::new()), &store(&dir))
            .await;
        assert_eq!(summary.errors, 4);
        assert_eq!(summary.rate_limited, 4);
        assert!(!summary.tripped);
    }

    #[tokio::test]
    async fn final_checkpoint_holds_existing_and_new_rows() {
        let dir = tempfile::tempdir().unwrap();
        let existing = Record::from_value(json!({
            "date": "2024-12-31", "model": "m1", "brand": "Samsung", "concept": "AI"
        }))
        .unwrap();
        let acc = Arc::new(RecordAccumulator::with_existing(vec![existing]));
        let cp = store(&dir);

        let summary = Dispatcher::new(Arc::new(MixedFetcher), DispatchConfig::default())
            .run(tasks(3, "m1"), acc, &cp)
            .await;
        assert_eq!(summary.total_rows, 7);
        assert_eq!(summary.new_rows, 6);

        let state = cp.load().await.unwrap();
        assert_eq!(state.records.len(), 7);
        assert_eq!(state.completed.len(), 4);
    }

    #[tokio::test]
    async fn cancelled_shutdown_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let summary = Dispatcher::new(Arc::new(MixedFetcher), DispatchConfig::default())
            .with_shutdown(token)
            .run(tasks(5, "m1"), Arc::new(RecordAccumulator::new()), &store(&dir))
            .await;
        assert!(summary.interrupted);
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.not_started, 5);
    }

    #[tokio::test]
    async fn shutdown_keeps_results_of_tasks_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let cp = store(&dir);
        let fetcher = Arc::new(SlowFetcher {
            finished: AtomicUsize::new(0),
        });
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let summary = Dispatcher::new(
            fetcher.clone(),
            DispatchConfig {
                workers: 4,
                checkpoint_every: 1000,
                error_threshold: 50,
            },
        )
        .with_shutdown(token)
        .run(tasks(40, "m1"), Arc::new(RecordAccumulator::new()), &cp)
        .await;

        let finished = fetcher.finished.load(Ordering::SeqCst);
        assert!(summary.interrupted);
        assert!(summary.not_started > 0);
        assert_eq!(summary.completed, finished);
        assert_eq!(summary.completed + summary.not_started, 40);
        let state = cp.load().await.unwrap();
        assert_eq!(state.records.len(), finished * 2);
    }
}
