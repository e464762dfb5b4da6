//! Bounded-concurrency worker pool over a shared unit queue

use indicatif::ProgressBar;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::core::checkpoint::ProgressCheckpoint;
use crate::core::client::ModelGateway;
use crate::core::config::ConcurrencyConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::lookup::{filter_new_units, ExistingUnitLookup};
use crate::core::models::{RunStats, TranslationUnit};
use crate::core::parser::ResponseParser;
use crate::core::retry::{RetryPolicy, UnitOutcome};
use crate::core::store::ArtifactStore;

/// Cooperative stop flag, checked before each dequeue
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Ask workers to stop after their current unit
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct RunCounters {
    processed: AtomicUsize,
    successful: AtomicUsize,
    failed: AtomicUsize,
}

/// Shared queue and counters for one `process_all` call
struct RunState {
    units: Arc<[TranslationUnit]>,
    cursor: AtomicUsize,
    counters: RunCounters,
}

impl RunState {
    fn new(units: Vec<TranslationUnit>) -> Self {
        Self {
            units: units.into(),
            cursor: AtomicUsize::new(0),
            counters: RunCounters::default(),
        }
    }

    /// The only hand-off point: each index is returned to exactly one worker
    fn next_unit(&self) -> Option<&TranslationUnit> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.units.get(index)
    }

    fn remaining(&self) -> usize {
        self.units
            .len()
            .saturating_sub(self.cursor.load(Ordering::SeqCst))
    }
}

/// Drives units through gateway, parser and retry policy with N workers
pub struct WorkerPool {
    gateway: Arc<dyn ModelGateway>,
    parser: ResponseParser,
    policy: RetryPolicy,
    store: Arc<ArtifactStore>,
    checkpoint: ProgressCheckpoint,
    concurrency: ConcurrencyConfig,
    lookup: Option<Arc<dyn ExistingUnitLookup>>,
    progress: Option<ProgressBar>,
    cancel: CancelHandle,
}

impl WorkerPool {
    /// Pool with no lookup and no progress bar
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        parser: ResponseParser,
        policy: RetryPolicy,
        checkpoint: ProgressCheckpoint,
        store: Arc<ArtifactStore>,
        concurrency: ConcurrencyConfig,
    ) -> Self {
        Self {
            gateway,
            parser,
            policy,
            store,
            checkpoint,
            concurrency,
            lookup: None,
            progress: None,
            cancel: CancelHandle::default(),
        }
    }

    /// Filter units through an existence lookup before the run starts
    pub fn with_lookup(mut self, lookup: Arc<dyn ExistingUnitLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Report progress on an indicatif bar
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Handle that stops the run between units
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Store receiving terminal records
    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Translate every unit; per-unit failures never abort the run
    pub async fn process_all(&self, units: Vec<TranslationUnit>) -> Result<RunStats> {
        if let Some(dir) = self.checkpoint.paths().dir() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| TranslationError::FileError {
                        path: dir.display().to_string(),
                        message: e.to_string(),
                    })?;
            }
        }

        let (units, skipped) = match self.lookup.clone() {
            // The lookup may block on disk
            Some(lookup) => tokio::task::spawn_blocking(move || {
                filter_new_units(units, Some(lookup.as_ref()))
            })
            .await
            .map_err(|e| TranslationError::InternalError(format!("lookup task failed: {}", e)))?,
            None => (units, 0),
        };
        let total = units.len();
        let workers = self.concurrency.workers.max(1).min(total.max(1));

        if let Some(pb) = &self.progress {
            pb.set_length(total as u64);
        }
        info!(
            "Processing {} unit(s) with {} worker(s), primary model {}",
            total, workers, self.policy.primary_model
        );

        let state = Arc::new(RunState::new(units));
        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            let worker = Worker {
                id: worker_id,
                state: state.clone(),
                gateway: self.gateway.clone(),
                parser: self.parser,
                policy: self.policy.clone(),
                store: self.store.clone(),
                checkpoint: self.checkpoint.clone(),
                concurrency: self.concurrency.clone(),
                progress: self.progress.clone(),
                cancel: self.cancel.clone(),
            };
            tasks.spawn(worker.run());
        }

        let mut pending_flushes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(flushes) => pending_flushes.extend(flushes),
                Err(e) => error!("Worker task ended abnormally: {}", e),
            }
        }
        for flush in pending_flushes {
            if let Err(e) = flush.await {
                error!("Checkpoint task ended abnormally: {}", e);
            }
        }

        if self.cancel.is_cancelled() {
            warn!("Run cancelled with {} unit(s) left in the queue", state.remaining());
        }

        self.checkpoint.flush_now().await?;

        let stats = RunStats {
            processed: state.counters.processed.load(Ordering::SeqCst),
            successful: state.counters.successful.load(Ordering::SeqCst),
            failed: state.counters.failed.load(Ordering::SeqCst),
            skipped,
            checkpoints: self.checkpoint.completed(),
        };

        if let Some(pb) = &self.progress {
            pb.finish_with_message("Completed");
        }
        info!(
            "Run finished: {} processed, {} successful, {} failed, {} skipped",
            stats.processed, stats.successful, stats.failed, stats.skipped
        );
        Ok(stats)
    }
}

struct Worker {
    id: usize,
    state: Arc<RunState>,
    gateway: Arc<dyn ModelGateway>,
    parser: ResponseParser,
    policy: RetryPolicy,
    store: Arc<ArtifactStore>,
    checkpoint: ProgressCheckpoint,
    concurrency: ConcurrencyConfig,
    progress: Option<ProgressBar>,
    cancel: CancelHandle,
}

impl Worker {
    /// Returns the background checkpoints it started so the pool can await them
    async fn run(self) -> Vec<JoinHandle<()>> {
        let mut flushes = Vec::new();
        let stagger = self.concurrency.stagger() * self.id as u32;
        if !stagger.is_zero() {
            sleep(stagger).await;
        }

        let mut first = true;
        loop {
            if !first && !self.concurrency.inter_unit_delay().is_zero() {
                sleep(self.concurrency.inter_unit_delay()).await;
            }
            first = false;

            if self.cancel.is_cancelled() {
                debug!("Worker {} stopping on cancel", self.id);
                break;
            }
            let Some(unit) = self.state.next_unit() else {
                break;
            };

            if let Some(pb) = &self.progress {
                pb.set_message(format!("{}", unit.id));
            }

            let outcome = self
                .policy
                .attempt_unit(self.gateway.as_ref(), &self.parser, unit)
                .await;
            self.finish(unit, outcome);

            let done = self.state.counters.processed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }

            if done % self.concurrency.checkpoint_every.max(1) == 0 {
                debug!("Worker {} triggering checkpoint at {} units", self.id, done);
                flushes.push(self.checkpoint.flush_in_background());
                if !self.concurrency.pacing_pause().is_zero() {
                    info!(
                        "Pausing for {:?} to respect rate limits",
                        self.concurrency.pacing_pause()
                    );
                    sleep(self.concurrency.pacing_pause()).await;
                }
            }
        }
        flushes
    }

    /// Record exactly one terminal record for the unit
    fn finish(&self, unit: &TranslationUnit, outcome: UnitOutcome) {
        let counters = &self.state.counters;
        match outcome {
            UnitOutcome::Success(record) => {
                for warning in &record.parse_warnings {
                    warn!(unit = %unit.id, "{}", warning);
                }
                if self.store.record(&record) {
                    counters.successful.fetch_add(1, Ordering::SeqCst);
                    debug!(unit = %unit.id, model = %record.source_model, "Recorded translation");
                } else {
                    self.store_duplicate(unit);
                }
            }
            UnitOutcome::Failure(failure) => {
                if self.store.record_failure(&failure) {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                } else {
                    self.store_duplicate(unit);
                }
            }
        }
    }

    /// Unit ids are unique per run, so this only fires on malformed input
    fn store_duplicate(&self, unit: &TranslationUnit) {
        warn!(unit = %unit.id, "Duplicate unit id in run; keeping the first record");
        self.state.counters.failed.fetch_add(1, Ordering::SeqCst);
    }
}
