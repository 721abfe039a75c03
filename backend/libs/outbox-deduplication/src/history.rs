//! Sliding window of recent cleanup results and the delay derived from it
//!
//! Observations are stamped with Tokio's monotonic clock. Only the span of
//! the window matters, so wall-clock adjustments cannot shrink it.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Number of observations kept in the window
pub const HISTORY_LENGTH: usize = 25;

/// Number of records one cleanup pass should remove, approximately
pub const TARGET_BATCH_SIZE: u64 = 1000;

/// Lower bound for the delay between two cleanups
pub const CLEANUP_INTERVAL_MIN: Duration = Duration::from_millis(100);

/// Outcome of one cleanup attempt as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupObservation {
    pub records_deleted: u64,
    pub observed_at: Instant,
}

impl CleanupObservation {
    pub fn new(records_deleted: u64, observed_at: Instant) -> Self {
        Self {
            records_deleted,
            observed_at,
        }
    }
}

/// Fixed-size FIFO of the last [`HISTORY_LENGTH`] observations, oldest first
#[derive(Debug, Clone)]
pub struct ObservationHistory {
    entries: VecDeque<CleanupObservation>,
}

impl ObservationHistory {
    /// Back-fill the window with zero-count observations spaced `frequency`
    /// apart, ending one `frequency` before `now`.
    ///
    /// An offset the platform clock cannot represent collapses onto `now`.
    pub fn seeded(now: Instant, frequency: Duration) -> Self {
        let mut entries = VecDeque::with_capacity(HISTORY_LENGTH);

        for i in (1..=HISTORY_LENGTH as u32).rev() {
            let observed_at = frequency
                .checked_mul(i)
                .and_then(|offset| now.checked_sub(offset))
                .unwrap_or(now);
            entries.push_back(CleanupObservation::new(0, observed_at));
        }

        Self { entries }
    }

    /// Build a window from explicit observations, oldest first
    ///
    /// Returns `None` unless exactly [`HISTORY_LENGTH`] observations are given.
    pub fn from_observations(observations: Vec<CleanupObservation>) -> Option<Self> {
        if observations.len() != HISTORY_LENGTH {
            return None;
        }
        Some(Self {
            entries: observations.into(),
        })
    }

    /// Evict the oldest observation and append `observation`
    pub fn record(&mut self, observation: CleanupObservation) {
        self.entries.pop_front();
        self.entries.push_back(observation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn oldest(&self) -> Option<&CleanupObservation> {
        self.entries.front()
    }

    pub fn newest(&self) -> Option<&CleanupObservation> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CleanupObservation> {
        self.entries.iter()
    }

    /// Milliseconds spanned by the window, zero if out of order
    pub fn period_ms(&self) -> u64 {
        match (self.oldest(), self.newest()) {
            (Some(oldest), Some(newest)) => {
                let span = newest.observed_at.saturating_duration_since(oldest.observed_at);
                u64::try_from(span.as_millis()).unwrap_or(u64::MAX)
            }
            _ => 0,
        }
    }

    pub fn total_count(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.records_deleted))
    }

    /// Delay before the next cleanup
    ///
    /// Aims for one pass per [`TARGET_BATCH_SIZE`] records at the observed
    /// deletion rate, clamped to `[CLEANUP_INTERVAL_MIN, max]`. An empty
    /// window (nothing deleted) backs off to `max`.
    pub fn next_delay(&self, max: Duration) -> Duration {
        let total_count = self.total_count();
        if total_count == 0 {
            return max.max(CLEANUP_INTERVAL_MIN);
        }

        let raw_ms = u128::from(self.period_ms()) * u128::from(TARGET_BATCH_SIZE)
            / u128::from(total_count);
        let raw_ms = u64::try_from(raw_ms).unwrap_or(u64::MAX);

        Duration::from_millis(raw_ms)
            .min(max)
            .max(CLEANUP_INTERVAL_MIN)
    }
}
