//! SQLite-backed broker.
//!
//! A queue table in the shared database, so the API process and worker
//! processes coordinate without any direct connection between them.
//! Claiming is a single conditional `UPDATE ... RETURNING`, which SQLite
//! executes atomically, so no two consumers ever hold the same message.
//! A message locked by an executor that died before ack becomes visible
//! again after the visibility timeout (at-least-once delivery).
//!
//! Schema lives with the rest of the DDL in [`crate::store::sqlite`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::{Broker, Delivery, RetryPolicy};
use crate::domain::TaskEnvelope;
use crate::error::ConveyorError;

/// How long a claimed message stays invisible before it is assumed
/// abandoned and re-offered.
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Sleep between claim attempts while waiting for work.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct SqliteBroker {
    pool: SqlitePool,
    retry_policy: RetryPolicy,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl SqliteBroker {
    pub fn new(pool: SqlitePool, retry_policy: RetryPolicy) -> Self {
        Self {
            pool,
            retry_policy,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Unlock messages whose executor disappeared: locked longer ago than
    /// the visibility timeout, never acked. Counts as a redelivery.
    async fn release_expired(&self, queue: &str) -> Result<(), ConveyorError> {
        let now_ms = Utc::now().timestamp_millis();
        let cutoff_ms = now_ms - self.visibility_timeout.as_millis() as i64;

        sqlx::query(
            "UPDATE queue_messages \
             SET locked_at = NULL, delivery_count = delivery_count + 1, available_at = ?1 \
             WHERE queue = ?2 AND locked_at IS NOT NULL AND locked_at <= ?3",
        )
        .bind(now_ms)
        .bind(queue)
        .bind(cutoff_ms)
        .execute(&self.pool)
        .await
        .map_err(broker_err)?;
        Ok(())
    }

    /// Claim the oldest available message. Atomic: the subquery and the
    /// lock write happen in one statement.
    async fn claim_one(&self, queue: &str) -> Result<Option<(i64, String, i64)>, ConveyorError> {
        let now_ms = Utc::now().timestamp_millis();

        let row = sqlx::query(
            "UPDATE queue_messages SET locked_at = ?1 \
             WHERE id = ( \
                 SELECT id FROM queue_messages \
                 WHERE queue = ?2 AND locked_at IS NULL AND available_at <= ?1 \
                 ORDER BY id LIMIT 1 \
             ) \
             RETURNING id, body, delivery_count",
        )
        .bind(now_ms)
        .bind(queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(broker_err)?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some((
                row.try_get("id").map_err(broker_err)?,
                row.try_get("body").map_err(broker_err)?,
                row.try_get("delivery_count").map_err(broker_err)?,
            ))),
        }
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<(), ConveyorError> {
        envelope.validate()?;
        let body = serde_json::to_string(envelope)?;
        let now_ms = Utc::now().timestamp_millis();

        sqlx::query(
            "INSERT INTO queue_messages (queue, body, available_at, delivery_count) \
             VALUES (?1, ?2, ?3, 0)",
        )
        .bind(queue)
        .bind(body)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(broker_err)?;
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, ConveyorError> {
        let deadline = Instant::now() + timeout;

        loop {
            self.release_expired(queue).await?;

            if let Some((id, body, delivery_count)) = self.claim_one(queue).await? {
                let envelope: TaskEnvelope = match serde_json::from_str(&body) {
                    Ok(env) => env,
                    Err(err) => {
                        tracing::warn!(queue, message_id = id, error = %err, "dropping undecodable message");
                        delete_message(&self.pool, id).await?;
                        continue;
                    }
                };
                if let Err(err) = envelope.validate() {
                    tracing::warn!(queue, message_id = id, error = %err, "dropping invalid envelope");
                    delete_message(&self.pool, id).await?;
                    continue;
                }

                return Ok(Some(Box::new(SqliteDelivery {
                    envelope,
                    id,
                    delivery_count,
                    pool: self.pool.clone(),
                    retry_policy: self.retry_policy.clone(),
                })));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let sleep_for = self.poll_interval.min(deadline - now);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

struct SqliteDelivery {
    envelope: TaskEnvelope,
    id: i64,
    delivery_count: i64,
    pool: SqlitePool,
    retry_policy: RetryPolicy,
}

#[async_trait]
impl Delivery for SqliteDelivery {
    fn envelope(&self) -> &TaskEnvelope {
        &self.envelope
    }

    fn redelivered(&self) -> bool {
        self.delivery_count > 0
    }

    async fn ack(self: Box<Self>) -> Result<(), ConveyorError> {
        delete_message(&self.pool, self.id).await
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), ConveyorError> {
        if !requeue {
            return delete_message(&self.pool, self.id).await;
        }

        let next_count = self.delivery_count + 1;
        let delay = self.retry_policy.next_delay(next_count as u32);
        let available_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        sqlx::query(
            "UPDATE queue_messages \
             SET locked_at = NULL, delivery_count = ?1, available_at = ?2 \
             WHERE id = ?3",
        )
        .bind(next_count)
        .bind(available_at)
        .bind(self.id)
        .execute(&self.pool)
        .await
        .map_err(broker_err)?;
        Ok(())
    }
}

async fn delete_message(pool: &SqlitePool, id: i64) -> Result<(), ConveyorError> {
    sqlx::query("DELETE FROM queue_messages WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(broker_err)?;
    Ok(())
}

/// Connection-level failures are `BrokerUnavailable` (the caller retries
/// with backoff); everything else is a store fault.
fn broker_err(err: sqlx::Error) -> ConveyorError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            ConveyorError::BrokerUnavailable(err.to_string())
        }
        other => ConveyorError::Store(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionId, FlowId};
    use crate::store::sqlite::{apply_schema, connect_pool};

    async fn test_broker(dir: &tempfile::TempDir) -> SqliteBroker {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("broker.db").display());
        let pool = connect_pool(&url).await.unwrap();
        apply_schema(&pool).await.unwrap();
        SqliteBroker::new(pool, RetryPolicy::new(Duration::from_millis(20), 2.0))
            .with_poll_interval(Duration::from_millis(10))
    }

    fn envelope() -> TaskEnvelope {
        TaskEnvelope::new(
            ExecutionId::generate(),
            FlowId::new("f1"),
            serde_json::json!({"k": "v"}),
        )
    }

    #[tokio::test]
    async fn enqueue_dequeue_ack_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let broker = test_broker(&dir).await;
        let env = envelope();

        broker.enqueue("work", &env).await.unwrap();
        let delivery = broker
            .dequeue("work", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(delivery.envelope().execution_id(), env.execution_id());
        assert_eq!(delivery.envelope().payload(), env.payload());
        assert!(!delivery.redelivered());
        delivery.ack().await.unwrap();

        // Acked message is gone.
        let again = broker
            .dequeue("work", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers() {
        let dir = tempfile::tempdir().unwrap();
        let broker = test_broker(&dir).await;
        broker.enqueue("work", &envelope()).await.unwrap();

        let delivery = broker
            .dequeue("work", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        delivery.nack(true).await.unwrap();

        let redelivery = broker
            .dequeue("work", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert!(redelivery.redelivered());
        redelivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn nack_without_requeue_drops() {
        let dir = tempfile::tempdir().unwrap();
        let broker = test_broker(&dir).await;
        broker.enqueue("work", &envelope()).await.unwrap();

        let delivery = broker
            .dequeue("work", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        delivery.nack(false).await.unwrap();

        let again = broker
            .dequeue("work", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn abandoned_message_is_redelivered_after_visibility_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let broker = test_broker(&dir)
            .await
            .with_visibility_timeout(Duration::from_millis(50));
        broker.enqueue("work", &envelope()).await.unwrap();

        // Claim and drop the delivery without ack/nack: a crashed executor.
        let delivery = broker
            .dequeue("work", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        drop(delivery);

        let redelivery = broker
            .dequeue("work", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert!(redelivery.redelivered());
    }
}
