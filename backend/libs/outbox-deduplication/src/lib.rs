//! # Outbox Deduplication Library
//!
//! Durable deduplication records for a transactional outbox, stored in
//! PostgreSQL, plus a background cleaner that removes records once they are
//! older than a retention window.
//!
//! ## Records
//!
//! A handler stores the record for an incoming message inside its own
//! transaction, so the "already processed" marker commits atomically with
//! the business changes. Once the outgoing operations are sent the record is
//! marked dispatched and only serves to reject duplicates.
//!
//! ```ignore
//! use outbox_deduplication::SqlxOutboxPersister;
//! # use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let persister = SqlxOutboxPersister::new(pool.clone(), "billing");
//!
//! if persister.get("msg-123").await?.is_some() {
//!     return Ok(()); // duplicate
//! }
//!
//! let mut tx = pool.begin().await?;
//! // ... business writes on &mut *tx ...
//! persister.store(&mut tx, "msg-123", &serde_json::json!([])).await?;
//! tx.commit().await?;
//!
//! persister.set_as_dispatched("msg-123").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cleanup
//!
//! Deduplication records must be kept long enough to catch redeliveries but
//! cannot grow forever. [`OutboxCleaner`] deletes dispatched records older
//! than the retention window on an adaptive schedule:
//!
//! - the first pass runs immediately at startup
//! - each pass looks at the last 25 results and aims to remove roughly 1000
//!   records per pass, so a backlog is drained quickly and an idle table is
//!   polled at the configured cadence
//! - the delay is clamped between 100ms and the configured cadence
//! - 10 consecutive failures raise a [`CriticalError`]; the cleaner keeps going
//!
//! ## Configuration
//!
//! | Env var | Default |
//! |---|---|
//! | `OUTBOX_TIME_TO_KEEP_DEDUPLICATION_DATA` | `7.00:00:00` (7 days) |
//! | `OUTBOX_FREQUENCY_TO_RUN_DEDUPLICATION_DATA_CLEANUP` | `00:01:00` (1 minute) |
//!
//! A malformed value fails [`OutboxCleaner::start`] before anything is
//! scheduled.
//!
//! ## Database Migration
//!
//! ```bash
//! sqlx migrate run --source backend/libs/outbox-deduplication/migrations
//! ```

mod cleaner;
mod config;
mod error;
mod guard;
mod history;
mod metrics;
mod persister;

pub use cleaner::{CleanupOutcome, CleanupState, NextCleanup, OutboxCleaner};
pub use config::{
    parse_timespan, CleanupSettings, RetentionPolicy, DEFAULT_FREQUENCY_TO_RUN_CLEANUP,
    DEFAULT_TIME_TO_KEEP_DEDUPLICATION_DATA, FREQUENCY_TO_RUN_CLEANUP_KEY,
    TIME_TO_KEEP_DEDUPLICATION_DATA_KEY,
};
pub use error::{OutboxError, OutboxResult};
pub use guard::{
    CriticalError, FailureEscalation, LoggingCriticalError, ESCALATION_MESSAGE,
    MAX_CONSECUTIVE_FAILURES,
};
pub use history::{
    CleanupObservation, ObservationHistory, CLEANUP_INTERVAL_MIN, HISTORY_LENGTH,
    TARGET_BATCH_SIZE,
};
pub use metrics::CleanupMetrics;
pub use persister::{OutboxRecord, OutboxStorage, SqlxOutboxPersister};
