//! Error types for the outbox deduplication library

use thiserror::Error;

/// Result type for outbox operations
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur while storing or cleaning outbox records
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A configuration setting was present but could not be parsed
    #[error("Invalid value {value:?} for setting {key}: {reason}")]
    InvalidSetting {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// Message ID validation failed (empty or too long)
    #[error("Invalid message ID: {0}")]
    InvalidMessageId(String),

    /// No outbox record exists for the message
    #[error("Outbox record not found: {0}")]
    RecordNotFound(String),

    /// `start` was called on a cleaner that is already running
    #[error("Outbox cleaner is already running")]
    AlreadyStarted,

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl OutboxError {
    /// Check if error is a configuration error (fatal at startup)
    pub fn is_config(&self) -> bool {
        matches!(self, OutboxError::InvalidSetting { .. })
    }

    /// Check if error is transient (should retry)
    ///
    /// Looks through `anyhow` context for the underlying database error.
    pub fn is_transient(&self) -> bool {
        match self {
            OutboxError::Database(sqlx_err) => is_transient_sqlx(sqlx_err),
            OutboxError::Other(err) => err
                .downcast_ref::<sqlx::Error>()
                .is_some_and(is_transient_sqlx),
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_setting_names_key() {
        let err = OutboxError::InvalidSetting {
            key: "OUTBOX_TIME_TO_KEEP_DEDUPLICATION_DATA",
            value: "forever".to_string(),
            reason: "expected [d.]hh:mm[:ss[.fffffff]]".to_string(),
        };

        let message = err.to_string();
        assert!(message.contains("OUTBOX_TIME_TO_KEEP_DEDUPLICATION_DATA"));
        assert!(message.contains("forever"));
        assert!(err.is_config());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(OutboxError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!OutboxError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!OutboxError::RecordNotFound("m-1".to_string()).is_transient());
    }

    #[test]
    fn test_transient_through_context() {
        use anyhow::Context;

        let timed_out: Result<(), sqlx::Error> = Err(sqlx::Error::PoolTimedOut);
        let err: OutboxError = timed_out
            .context("Failed to remove expired outbox records")
            .unwrap_err()
            .into();
        assert!(matches!(err, OutboxError::Other(_)));
        assert!(err.is_transient());

        let missing: Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let err: OutboxError = missing.context("Failed to load outbox record").unwrap_err().into();
        assert!(!err.is_transient());

        let err: OutboxError = anyhow::anyhow!("unrelated").into();
        assert!(!err.is_transient());
    }
}
