//! Escalation of sustained cleanup failures

use tracing::error;

use crate::error::OutboxError;

/// Consecutive failures that trigger a critical error
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Message passed to the critical error sink on escalation
pub const ESCALATION_MESSAGE: &str = "Failed to clean expired Outbox records after 10 consecutive unsuccessful attempts. The most likely cause of this is connectivity issues with your database.";

/// Process-level alarm raised when cleanup keeps failing
///
/// Raising is observational: the cleaner keeps running afterwards.
pub trait CriticalError: Send + Sync {
    fn raise(&self, message: &str, cause: &OutboxError);
}

impl<F> CriticalError for F
where
    F: Fn(&str, &OutboxError) + Send + Sync,
{
    fn raise(&self, message: &str, cause: &OutboxError) {
        self(message, cause)
    }
}

/// Critical error sink that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCriticalError;

impl CriticalError for LoggingCriticalError {
    fn raise(&self, message: &str, cause: &OutboxError) {
        error!(error = ?cause, "{}", message);
    }
}

/// Counts consecutive failed attempts
///
/// The counter only resets after an escalation; a successful attempt in
/// between does not clear it.
#[derive(Debug, Default)]
pub struct FailureEscalation {
    consecutive_failures: u32,
}

impl FailureEscalation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a failed attempt, raising through `sink` once the threshold is hit
    ///
    /// Returns `true` if an escalation was raised.
    pub fn record_failure(&mut self, cause: &OutboxError, sink: &dyn CriticalError) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures < MAX_CONSECUTIVE_FAILURES {
            return false;
        }

        sink.raise(ESCALATION_MESSAGE, cause);
        self.consecutive_failures = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failure() -> OutboxError {
        OutboxError::Database(sqlx::Error::PoolTimedOut)
    }

    #[test]
    fn test_escalates_on_tenth_failure() {
        let raised = AtomicU32::new(0);
        let sink = |message: &str, _cause: &OutboxError| {
            assert_eq!(message, ESCALATION_MESSAGE);
            raised.fetch_add(1, Ordering::SeqCst);
        };
        let mut guard = FailureEscalation::new();

        for _ in 0..9 {
            assert!(!guard.record_failure(&failure(), &sink));
        }
        assert_eq!(raised.load(Ordering::SeqCst), 0);
        assert_eq!(guard.consecutive_failures(), 9);

        assert!(guard.record_failure(&failure(), &sink));
        assert_eq!(raised.load(Ordering::SeqCst), 1);
        assert_eq!(guard.consecutive_failures(), 0);
    }

    #[test]
    fn test_escalates_again_after_reset() {
        let raised = AtomicU32::new(0);
        let sink = |_: &str, _: &OutboxError| {
            raised.fetch_add(1, Ordering::SeqCst);
        };
        let mut guard = FailureEscalation::new();

        for _ in 0..(MAX_CONSECUTIVE_FAILURES * 3) {
            guard.record_failure(&failure(), &sink);
        }

        assert_eq!(raised.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_logging_sink_does_not_panic() {
        let mut guard = FailureEscalation::new();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            guard.record_failure(&failure(), &LoggingCriticalError);
        }
        assert_eq!(guard.consecutive_failures(), 0);
    }
}
