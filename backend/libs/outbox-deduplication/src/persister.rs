//! PostgreSQL storage for outbox deduplication records

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OutboxError, OutboxResult};

const MAX_MESSAGE_ID_LEN: usize = 255;

/// Deduplication record for one incoming message
///
/// While `dispatched` is false the record still carries the outgoing
/// transport operations produced by the handler. Once dispatched they are
/// cleared and the record only proves the message was already handled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Auto-generated UUID for this record
    pub id: Uuid,

    /// Incoming message identifier, unique per endpoint
    pub message_id: String,

    /// Endpoint that owns the record
    pub endpoint: String,

    /// Whether the transport operations have been sent
    pub dispatched: bool,

    /// When the operations were sent; cleanup keys off this column
    pub dispatched_at: Option<DateTime<Utc>>,

    /// Serialized outgoing operations (empty array once dispatched)
    pub transport_operations: serde_json::Value,
}

impl OutboxRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            endpoint: row.try_get("endpoint")?,
            dispatched: row.try_get("dispatched")?,
            dispatched_at: row.try_get("dispatched_at")?,
            transport_operations: row.try_get("transport_operations")?,
        })
    }
}

/// Deletion operation the cleaner drives
#[async_trait]
pub trait OutboxStorage: Send + Sync {
    /// Delete dispatched records whose `dispatched_at` is before `cutoff`
    ///
    /// Returns the number of records removed.
    async fn remove_entries_older_than(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64>;
}

/// SQLx-based outbox persister scoped to one endpoint
#[derive(Clone)]
pub struct SqlxOutboxPersister {
    pool: PgPool,
    endpoint: String,
}

impl SqlxOutboxPersister {
    /// Create a persister for `endpoint`
    ///
    /// # Arguments
    ///
    /// * `pool` - PostgreSQL connection pool
    /// * `endpoint` - Name of the endpoint whose records this persister owns
    pub fn new(pool: PgPool, endpoint: impl Into<String>) -> Self {
        Self {
            pool,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Look up the record for `message_id`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))` if the message was seen before
    /// - `Ok(None)` if it was not
    /// - `Err` on database errors
    pub async fn get(&self, message_id: &str) -> OutboxResult<Option<OutboxRecord>> {
        validate_message_id(message_id)?;

        let row = sqlx::query(
            r#"
            SELECT id, message_id, endpoint, dispatched, dispatched_at, transport_operations
            FROM outbox_records
            WHERE endpoint = $1 AND message_id = $2
            "#,
        )
        .bind(&self.endpoint)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load outbox record")?;

        row.as_ref()
            .map(OutboxRecord::from_row)
            .transpose()
            .map_err(OutboxError::from)
    }

    /// Store the record for `message_id` inside the handler's transaction
    ///
    /// Uses INSERT ... ON CONFLICT DO NOTHING, so a concurrent duplicate of
    /// the same message is a no-op.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if the record was inserted
    /// - `Ok(false)` if a record for this message already exists
    pub async fn store(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message_id: &str,
        transport_operations: &serde_json::Value,
    ) -> OutboxResult<bool> {
        validate_message_id(message_id)?;

        let result = sqlx::query(
            r#"
            INSERT INTO outbox_records (id, message_id, endpoint, dispatched, transport_operations)
            VALUES ($1, $2, $3, FALSE, $4)
            ON CONFLICT (endpoint, message_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message_id)
        .bind(&self.endpoint)
        .bind(transport_operations)
        .execute(&mut **tx)
        .await
        .context("Failed to store outbox record")?;

        let was_inserted = result.rows_affected() > 0;
        if was_inserted {
            debug!(message_id = %message_id, endpoint = %self.endpoint, "Outbox record stored");
        } else {
            debug!(
                message_id = %message_id,
                endpoint = %self.endpoint,
                "Outbox record already exists (duplicate)"
            );
        }

        Ok(was_inserted)
    }

    /// Mark the record as dispatched and drop its transport operations
    pub async fn set_as_dispatched(&self, message_id: &str) -> OutboxResult<()> {
        validate_message_id(message_id)?;

        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET dispatched = TRUE,
                dispatched_at = NOW(),
                transport_operations = '[]'::jsonb
            WHERE endpoint = $1 AND message_id = $2
            "#,
        )
        .bind(&self.endpoint)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark outbox record as dispatched")?;

        if result.rows_affected() == 0 {
            warn!(message_id = %message_id, "Outbox record not found when marking as dispatched");
            return Err(OutboxError::RecordNotFound(message_id.to_string()));
        }

        debug!(message_id = %message_id, "Outbox record marked as dispatched");
        Ok(())
    }
}

#[async_trait]
impl OutboxStorage for SqlxOutboxPersister {
    async fn remove_entries_older_than(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_records
            WHERE endpoint = $1
              AND dispatched = TRUE
              AND dispatched_at < $2
            "#,
        )
        .bind(&self.endpoint)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to remove expired outbox records")?;

        let deleted_count = result.rows_affected();
        if deleted_count > 0 {
            info!(
                deleted_count = deleted_count,
                cutoff = %cutoff,
                endpoint = %self.endpoint,
                "Removed expired outbox records"
            );
        }

        Ok(deleted_count)
    }
}

fn validate_message_id(message_id: &str) -> OutboxResult<()> {
    if message_id.is_empty() {
        return Err(OutboxError::InvalidMessageId(
            "Message ID cannot be empty".to_string(),
        ));
    }

    if message_id.len() > MAX_MESSAGE_ID_LEN {
        return Err(OutboxError::InvalidMessageId(format!(
            "Message ID too long: {} characters (max {})",
            message_id.len(),
            MAX_MESSAGE_ID_LEN
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_message_id() {
        assert!(validate_message_id("msg-123").is_ok());
        assert!(validate_message_id(&"x".repeat(255)).is_ok());

        let err = validate_message_id("").unwrap_err();
        assert!(matches!(err, OutboxError::InvalidMessageId(_)));

        let err = validate_message_id(&"x".repeat(256)).unwrap_err();
        assert!(matches!(err, OutboxError::InvalidMessageId(_)));
    }

    #[test]
    fn test_record_serializes() {
        let record = OutboxRecord {
            id: Uuid::new_v4(),
            message_id: "msg-1".to_string(),
            endpoint: "billing".to_string(),
            dispatched: false,
            dispatched_at: None,
            transport_operations: serde_json::json!([{ "destination": "sales" }]),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["message_id"], "msg-1");
        assert_eq!(json["dispatched"], false);
        assert_eq!(json["transport_operations"][0]["destination"], "sales");
    }

    #[tokio::test]
    async fn test_get_rejects_invalid_id_before_querying() {
        let pool = PgPool::connect_lazy("postgresql://localhost/test").unwrap();
        let persister = SqlxOutboxPersister::new(pool, "billing");

        let err = persister.get("").await.unwrap_err();
        assert!(matches!(err, OutboxError::InvalidMessageId(_)));
        assert_eq!(persister.endpoint(), "billing");
    }
}
