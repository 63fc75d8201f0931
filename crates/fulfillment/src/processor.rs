//! Fulfillment scheduler: the service object that owns the job registry and
//! drives reconciliation on a fixed interval.
//!
//! ## Tick
//!
//! 1. Select up to `batch_size` due jobs.
//! 2. Spawn one worker task per job; all supplier calls run concurrently.
//! 3. Wait for the whole batch to settle. A panicking worker counts as a
//!    transient failure and does not affect its peers.
//! 4. Apply outcomes one by one, skipping jobs that were cancelled or
//!    replaced while their call was in flight.
//!
//! A tick that starts while another one is still running is skipped, so at
//! most `batch_size` supplier calls are ever in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use storefront_core::OrderId;

use crate::backoff::BackoffPolicy;
use crate::clock::{Clock, SystemClock};
use crate::completion::{self, Completion};
use crate::config::{FulfillmentConfig, SupplierConfig};
use crate::error::{FulfillmentError, FulfillmentResult};
use crate::gateway::{HttpSupplierGateway, SupplierGateway};
use crate::job::{JobSnapshot, ReconciliationJob};
use crate::registry::JobRegistry;
use crate::store::OrderStore;
use crate::worker::{Outcome, ReconciliationWorker, RetryReason};

/// Read-only processor state for the admin status view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub active_job_count: usize,
    pub tick_in_progress: bool,
    pub running: bool,
    pub jobs: Vec<JobSnapshot>,
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Another tick was still running; nothing was done.
    pub skipped: bool,
    pub dispatched: usize,
    pub completed: usize,
    pub retried: usize,
    pub exhausted: usize,
    /// Outcomes dropped because the job was cancelled or replaced meanwhile.
    pub discarded: usize,
    /// Deliveries for orders that left `pending` some other way (e.g.
    /// cancelled); the job is dropped and nothing is written.
    pub not_pending: usize,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

struct Ticker {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: FulfillmentConfig,
    registry: Mutex<JobRegistry>,
    tick_in_progress: AtomicBool,
    store: Arc<dyn OrderStore>,
    worker: ReconciliationWorker,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    ticker: Mutex<Option<Ticker>>,
}

/// Background reconciliation of pending orders against the supplier.
///
/// Cheap to clone; clones share the same registry and lifecycle. Nothing runs
/// until [`start`](Self::start) is called.
#[derive(Clone)]
pub struct FulfillmentProcessor {
    inner: Arc<Inner>,
}

/// Builder for [`FulfillmentProcessor`].
pub struct FulfillmentProcessorBuilder {
    config: FulfillmentConfig,
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn SupplierGateway>,
    clock: Option<Arc<dyn Clock>>,
    backoff: Option<BackoffPolicy>,
}

impl FulfillmentProcessorBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the policy derived from `config.backoff` (e.g. a seeded one).
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn build(self) -> FulfillmentResult<FulfillmentProcessor> {
        self.config.validate()?;

        let backoff = self
            .backoff
            .unwrap_or_else(|| BackoffPolicy::new(&self.config.backoff));
        let worker = ReconciliationWorker::new(self.gateway, self.config.request_timeout);

        Ok(FulfillmentProcessor {
            inner: Arc::new(Inner {
                config: self.config,
                registry: Mutex::new(JobRegistry::new()),
                tick_in_progress: AtomicBool::new(false),
                store: self.store,
                worker,
                backoff,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                ticker: Mutex::new(None),
            }),
        })
    }
}

impl FulfillmentProcessor {
    pub fn builder(
        config: FulfillmentConfig,
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn SupplierGateway>,
    ) -> FulfillmentProcessorBuilder {
        FulfillmentProcessorBuilder {
            config,
            store,
            gateway,
            clock: None,
            backoff: None,
        }
    }

    pub fn new(
        config: FulfillmentConfig,
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn SupplierGateway>,
    ) -> FulfillmentResult<Self> {
        Self::builder(config, store, gateway).build()
    }

    /// Production wiring: configuration from the environment and the HTTP
    /// supplier gateway.
    pub fn from_env(store: Arc<dyn OrderStore>) -> FulfillmentResult<Self> {
        let config = FulfillmentConfig::from_env()?;
        let gateway = HttpSupplierGateway::new(&SupplierConfig::from_env()?)?;
        Self::new(config, store, Arc::new(gateway))
    }

    pub fn config(&self) -> &FulfillmentConfig {
        &self.inner.config
    }

    /// Queue an order that awaits upstream fulfillment.
    ///
    /// An existing job for the same order is replaced and its attempt history
    /// dropped; the replaced job's snapshot is returned.
    pub fn enqueue(
        &self,
        order_id: OrderId,
        upstream_reference: impl Into<String>,
        credential_token: impl Into<String>,
    ) -> Option<JobSnapshot> {
        let job = ReconciliationJob::new(
            order_id,
            upstream_reference,
            credential_token,
            self.inner.config.max_attempts,
            self.inner.clock.now(),
        );
        let order_id = job.order_id.clone();
        let upstream_reference = job.upstream_reference.clone();

        let replaced = self.inner.registry().enqueue(job);
        match &replaced {
            Some(previous) => info!(
                order_id = %order_id,
                upstream_reference = %upstream_reference,
                previous_attempts = previous.attempts,
                "fulfillment job replaced"
            ),
            None => info!(
                order_id = %order_id,
                upstream_reference = %upstream_reference,
                "fulfillment job enqueued"
            ),
        }
        replaced.map(|job| job.snapshot())
    }

    /// Remove an order's job out of band (e.g. manual cancellation).
    ///
    /// An in-flight supplier call is not interrupted; its result is discarded.
    pub fn cancel(&self, order_id: &OrderId) -> bool {
        let removed = self.inner.registry().remove(order_id).is_some();
        if removed {
            info!(order_id = %order_id, "fulfillment job cancelled");
        }
        removed
    }

    pub fn stats(&self) -> ProcessorStats {
        let running = self.is_running();
        let tick_in_progress = self.inner.tick_in_progress.load(Ordering::Acquire);
        let registry = self.inner.registry();
        ProcessorStats {
            active_job_count: registry.len(),
            tick_in_progress,
            running,
            jobs: registry.snapshots(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .ticker()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Start ticking every `poll_interval`. Calling it again while running is
    /// a no-op. Must be called from within a tokio runtime.
    pub fn start(&self) -> FulfillmentResult<()> {
        let mut ticker = self.inner.ticker();
        if ticker.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("fulfillment scheduler already running");
            return Ok(());
        }

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| FulfillmentError::NoRuntime)?;
        let shutdown = Arc::new(Notify::new());
        let handle = runtime.spawn(run_ticker(
            Arc::downgrade(&self.inner),
            shutdown.clone(),
            self.inner.config.poll_interval,
        ));
        *ticker = Some(Ticker { shutdown, handle });

        info!(
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            batch_size = self.inner.config.batch_size,
            max_attempts = self.inner.config.max_attempts,
            "fulfillment scheduler started"
        );
        Ok(())
    }

    /// Stop the ticker. Safe to call when not running. A tick already in
    /// progress is allowed to finish on its own.
    pub async fn stop(&self) {
        let ticker = self.inner.ticker().take();
        let Some(ticker) = ticker else {
            debug!("fulfillment scheduler not running");
            return;
        };

        ticker.shutdown.notify_one();
        if let Err(e) = ticker.handle.await {
            warn!(error = %e, "fulfillment ticker ended abnormally");
        }
        info!("fulfillment scheduler stopped");
    }

    /// Run one tick now (the ticker calls this; tests may too).
    ///
    /// The batch runs on its own task and holds the in-progress flag until
    /// every worker has settled and its outcome is applied. Dropping the
    /// returned future only stops waiting for the report.
    pub async fn tick(&self) -> TickReport {
        if self
            .inner
            .tick_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous tick still running; skipping");
            return TickReport::skipped();
        }

        let inner = self.inner.clone();
        let batch = tokio::spawn(async move {
            let _guard = TickGuard(&inner.tick_in_progress);
            inner.run_tick().await
        });

        match batch.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "reconciliation tick aborted");
                TickReport::default()
            }
        }
    }
}

impl std::fmt::Debug for FulfillmentProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulfillmentProcessor")
            .field("config", &self.inner.config)
            .field("active_jobs", &self.inner.registry().len())
            .finish_non_exhaustive()
    }
}

/// Clears the in-progress flag even if the batch task panics or is cancelled.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, JobRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticker(&self) -> MutexGuard<'_, Option<Ticker>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_tick(&self) -> TickReport {
        let due = self
            .registry()
            .due_jobs(self.clock.now(), self.config.batch_size);
        if due.is_empty() {
            return TickReport::default();
        }

        let mut report = TickReport {
            dispatched: due.len(),
            ..TickReport::default()
        };
        debug!(dispatched = report.dispatched, "dispatching reconciliation batch");

        let in_flight: Vec<_> = due
            .into_iter()
            .map(|job| {
                let worker = self.worker.clone();
                let task_job = job.clone();
                let handle = tokio::spawn(async move { worker.reconcile(&task_job).await });
                (job, handle)
            })
            .collect();

        let mut settled = Vec::with_capacity(in_flight.len());
        for (job, handle) in in_flight {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(order_id = %job.order_id, error = %e, "reconciliation worker panicked");
                    Outcome::transient(&job, RetryReason::WorkerPanicked(e.to_string()))
                }
            };
            settled.push((job, outcome));
        }

        for (job, outcome) in settled {
            self.apply(job, outcome, &mut report).await;
        }

        debug!(
            completed = report.completed,
            retried = report.retried,
            exhausted = report.exhausted,
            discarded = report.discarded,
            not_pending = report.not_pending,
            "reconciliation batch applied"
        );
        report
    }

    async fn apply(&self, job: ReconciliationJob, outcome: Outcome, report: &mut TickReport) {
        let still_current = { self.registry().is_current(&job.order_id, job.job_id) };
        if !still_current {
            debug!(
                order_id = %job.order_id,
                outcome = outcome.label(),
                "job cancelled or replaced while in flight; discarding outcome"
            );
            report.discarded += 1;
            return;
        }

        match outcome {
            Outcome::Completed(credentials) => {
                let now = self.clock.now();
                let store = self.store.as_ref();
                let completed =
                    completion::complete_order(store, &job.order_id, &credentials, now).await;
                match completed {
                    Ok(result) => {
                        if result != Completion::Applied {
                            debug!(
                                order_id = %job.order_id,
                                result = ?result,
                                "completion was a no-op"
                            );
                        }
                        let removed = {
                            self.registry()
                                .remove_if_current(&job.order_id, job.job_id)
                                .is_some()
                        };
                        match result {
                            _ if !removed => report.discarded += 1,
                            Completion::NotPending(_) => report.not_pending += 1,
                            Completion::Applied | Completion::AlreadyCompleted => {
                                report.completed += 1
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            order_id = %job.order_id,
                            error = %e,
                            "failed to record delivery; will fetch again"
                        );
                        let reason = RetryReason::StoreFailure(e.to_string());
                        self.settle_transient(&job, reason, report);
                    }
                }
            }
            Outcome::Retry(reason) => self.reschedule(&job, reason, report),
            Outcome::Exhausted(reason) => self.exhaust(&job, reason, report),
        }
    }

    fn settle_transient(
        &self,
        job: &ReconciliationJob,
        reason: RetryReason,
        report: &mut TickReport,
    ) {
        if job.is_last_attempt() {
            self.exhaust(job, reason, report);
        } else {
            self.reschedule(job, reason, report);
        }
    }

    fn reschedule(&self, job: &ReconciliationJob, reason: RetryReason, report: &mut TickReport) {
        let attempts = job.attempts.saturating_add(1).min(job.max_attempts);
        let delay = self.backoff.delay(attempts);
        let next_retry_at = retry_at(self.clock.now(), delay);

        let updated = {
            self.registry()
                .reschedule(&job.order_id, job.job_id, attempts, next_retry_at)
        };
        if !updated {
            report.discarded += 1;
            return;
        }

        report.retried += 1;
        debug!(
            order_id = %job.order_id,
            attempts,
            max_attempts = job.max_attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "fulfillment job rescheduled"
        );
    }

    fn exhaust(&self, job: &ReconciliationJob, reason: RetryReason, report: &mut TickReport) {
        let removed = {
            self.registry()
                .remove_if_current(&job.order_id, job.job_id)
                .is_some()
        };
        if !removed {
            report.discarded += 1;
            return;
        }

        report.exhausted += 1;
        error!(
            order_id = %job.order_id,
            upstream_reference = %job.upstream_reference,
            attempts = job.attempts.saturating_add(1),
            reason = %reason,
            "fulfillment retries exhausted; order left pending for manual review"
        );
    }
}

fn retry_at(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

async fn run_ticker(inner: Weak<Inner>, shutdown: Arc<Notify>, poll_interval: Duration) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else {
                    debug!("fulfillment processor dropped; ticker exiting");
                    break;
                };
                let processor = FulfillmentProcessor { inner };
                // Spawned so that a slow batch never delays the next interval;
                // overlapping ticks are skipped inside `tick()`.
                tokio::spawn(async move {
                    let report = processor.tick().await;
                    if report.skipped {
                        debug!("tick skipped");
                    }
                });
            }
        }
    }
}
