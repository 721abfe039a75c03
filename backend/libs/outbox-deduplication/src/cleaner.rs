//! Background cleaner for expired outbox records
//!
//! The cleaner runs on a single Tokio task:
//!
//! ```text
//! start ─► attempt ─► record outcome ─► compute delay ─► sleep ─┐
//!             ▲                                                  │
//!             └──────────────────────────────────────────────────┘
//!                          (sleep races the shutdown signal)
//! ```
//!
//! Attempts never overlap because the next sleep is only armed after the
//! current attempt has returned. Shutdown is observed while sleeping, never
//! while a deletion is in flight, so `stop` waits for the running attempt.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{CleanupSettings, RetentionPolicy};
use crate::error::{OutboxError, OutboxResult};
use crate::guard::{CriticalError, FailureEscalation};
use crate::history::{CleanupObservation, ObservationHistory};
use crate::metrics::CleanupMetrics;
use crate::persister::OutboxStorage;

/// Result of one cleanup attempt
#[derive(Debug)]
pub enum CleanupOutcome {
    /// Deletion succeeded and removed this many records
    Deleted(u64),

    /// Deletion failed; the error never leaves the attempt boundary
    Failed(OutboxError),
}

impl CleanupOutcome {
    pub fn records_deleted(&self) -> u64 {
        match self {
            CleanupOutcome::Deleted(count) => *count,
            CleanupOutcome::Failed(_) => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CleanupOutcome::Failed(_))
    }
}

/// What the scheduler decided after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextCleanup {
    pub delay: Duration,
    pub escalated: bool,
    /// Failure streak including this attempt, before any reset by escalation
    pub consecutive_failures: u32,
}

/// Scheduler state owned by one running cleaner
#[derive(Debug)]
pub struct CleanupState {
    policy: RetentionPolicy,
    history: ObservationHistory,
    failures: FailureEscalation,
}

impl CleanupState {
    /// Seed the observation window relative to `now`
    pub fn new(policy: RetentionPolicy, now: Instant) -> Self {
        Self {
            history: ObservationHistory::seeded(now, policy.frequency_to_run_cleanup),
            policy,
            failures: FailureEscalation::new(),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn history(&self) -> &ObservationHistory {
        &self.history
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.consecutive_failures()
    }

    /// Fold an attempt that started at `started_at` into the state
    ///
    /// Failures count toward escalation and are observed as zero deletions,
    /// so a failing database pushes the delay toward the configured maximum.
    pub fn record(
        &mut self,
        outcome: &CleanupOutcome,
        started_at: Instant,
        critical_error: &dyn CriticalError,
    ) -> NextCleanup {
        let (consecutive_failures, escalated) = match outcome {
            CleanupOutcome::Deleted(_) => (self.failures.consecutive_failures(), false),
            CleanupOutcome::Failed(err) => {
                let streak = self.failures.consecutive_failures().saturating_add(1);
                (streak, self.failures.record_failure(err, critical_error))
            }
        };

        self.history.record(CleanupObservation::new(
            outcome.records_deleted(),
            started_at,
        ));

        NextCleanup {
            delay: self
                .history
                .next_delay(self.policy.frequency_to_run_cleanup),
            escalated,
            consecutive_failures,
        }
    }
}

struct CleanupTask<S, C> {
    storage: Arc<S>,
    critical_error: Arc<C>,
    metrics: Option<CleanupMetrics>,
    state: CleanupState,
}

impl<S, C> CleanupTask<S, C>
where
    S: OutboxStorage + 'static,
    C: CriticalError + 'static,
{
    async fn run(mut self, mut shutdown: watch::Receiver<()>) {
        // First pass fires immediately
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let started_at = Instant::now();
            let outcome = self.attempt().await;
            delay = self.complete(&outcome, started_at);
        }

        debug!("Outbox cleanup task exited");
    }

    async fn attempt(&self) -> CleanupOutcome {
        let cutoff = self.state.policy().cutoff(Utc::now());

        match self.storage.remove_entries_older_than(cutoff).await {
            Ok(count) => CleanupOutcome::Deleted(count),
            Err(e) => CleanupOutcome::Failed(e),
        }
    }

    fn complete(&mut self, outcome: &CleanupOutcome, started_at: Instant) -> Duration {
        let next = self
            .state
            .record(outcome, started_at, &*self.critical_error);

        match outcome {
            CleanupOutcome::Deleted(count) => {
                if *count > 0 {
                    info!(deleted_count = count, "Cleaned up expired outbox records");
                } else {
                    debug!("No expired outbox records to clean up");
                }
                if let Some(metrics) = &self.metrics {
                    metrics.deleted.inc_by(*count);
                }
            }
            CleanupOutcome::Failed(e) => {
                warn!(
                    error = ?e,
                    transient = e.is_transient(),
                    consecutive_failures = next.consecutive_failures,
                    escalated = next.escalated,
                    "Outbox cleanup attempt failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.failures.inc();
                    if next.escalated {
                        metrics.escalations.inc();
                    }
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.observe_delay(next.delay);
        }
        debug!(
            delay_ms = next.delay.as_millis() as u64,
            "Next outbox cleanup scheduled"
        );

        next.delay
    }
}

struct RunningCleaner {
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

/// Adaptive background cleaner for expired outbox records
///
/// Owns its schedule for the lifetime of the host: create one per process,
/// call [`start`](Self::start) at startup and [`stop`](Self::stop) at
/// shutdown. Dropping a running cleaner signals its task to exit after the
/// current attempt without waiting for it.
///
/// # Example
///
/// ```ignore
/// use outbox_deduplication::{CleanupSettings, LoggingCriticalError, OutboxCleaner, SqlxOutboxPersister};
/// use std::sync::Arc;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let persister = Arc::new(SqlxOutboxPersister::new(pool, "billing"));
/// let mut cleaner = OutboxCleaner::new(persister, Arc::new(LoggingCriticalError));
///
/// cleaner.start(&CleanupSettings::from_env())?;
/// tokio::signal::ctrl_c().await?;
/// cleaner.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct OutboxCleaner<S, C> {
    storage: Arc<S>,
    critical_error: Arc<C>,
    metrics: Option<CleanupMetrics>,
    running: Option<RunningCleaner>,
}

impl<S, C> OutboxCleaner<S, C>
where
    S: OutboxStorage + 'static,
    C: CriticalError + 'static,
{
    /// Create a stopped cleaner
    ///
    /// # Arguments
    ///
    /// * `storage` - Deletion operation to drive
    /// * `critical_error` - Sink for the alarm raised after sustained failures
    pub fn new(storage: Arc<S>, critical_error: Arc<C>) -> Self {
        Self {
            storage,
            critical_error,
            metrics: None,
            running: None,
        }
    }

    /// Also report deletions, failures and delays to Prometheus
    pub fn with_metrics(mut self, metrics: CleanupMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Resolve `settings` and arm the first cleanup immediately
    ///
    /// Returns the resolved policy.
    ///
    /// # Errors
    ///
    /// - `OutboxError::InvalidSetting` if a setting is malformed; nothing is
    ///   scheduled and storage is never called
    /// - `OutboxError::AlreadyStarted` if the cleaner is already running
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self, settings: &CleanupSettings) -> OutboxResult<RetentionPolicy> {
        if self.running.is_some() {
            return Err(OutboxError::AlreadyStarted);
        }

        let policy = RetentionPolicy::resolve(settings)?;

        info!(
            retention_secs = policy.time_to_keep_deduplication_data.as_secs(),
            max_interval_ms = policy.frequency_to_run_cleanup.as_millis() as u64,
            "Outbox cleaner starting"
        );

        let task = CleanupTask {
            storage: Arc::clone(&self.storage),
            critical_error: Arc::clone(&self.critical_error),
            metrics: self.metrics.clone(),
            state: CleanupState::new(policy, Instant::now()),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(task.run(shutdown_rx));

        self.running = Some(RunningCleaner {
            shutdown_tx,
            handle,
        });

        Ok(policy)
    }

    /// Cancel the pending cleanup and wait for an in-flight one to finish
    ///
    /// No attempt starts after this returns. Calling `stop` on a stopped
    /// cleaner does nothing.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(());

        if let Err(e) = running.handle.await {
            error!(error = ?e, "Outbox cleanup task terminated abnormally");
        }

        info!("Outbox cleaner stopped");
    }
}
