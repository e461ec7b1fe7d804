//! Broker client: enqueue/dequeue/acknowledge over a message queue.

mod memory;
mod retry;
mod sqlite;

pub use memory::InMemoryBroker;
pub use retry::RetryPolicy;
pub use sqlite::SqliteBroker;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::TaskEnvelope;
use crate::error::ConveyorError;

/// A delivered envelope the executor currently owns.
///
/// Design intent:
/// - The broker manages message visibility; the worker executes side
///   effects and reports the outcome.
/// - Exactly one of `ack` / `nack` must be called per delivery. An
///   executor that dies without calling either gets the message
///   redelivered (at-least-once).
#[async_trait]
pub trait Delivery: Send {
    fn envelope(&self) -> &TaskEnvelope;

    /// True when the broker has handed this message out before. A crashed
    /// executor is the usual cause.
    fn redelivered(&self) -> bool;

    /// Confirm processing; the message is gone.
    async fn ack(self: Box<Self>) -> Result<(), ConveyorError>;

    /// Report failure. With `requeue` the broker redelivers after its
    /// backoff policy; without it the message is dropped (dead-lettering
    /// is the broker's business, not ours).
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), ConveyorError>;
}

/// Broker port. Implementations must deliver at least once and must not
/// hand the same message to two consumers at the same time.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish an envelope to a named queue. The message body is the
    /// serialized envelope; it must round-trip without loss.
    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<(), ConveyorError>;

    /// Take one message, waiting up to `timeout`. `Ok(None)` on timeout is
    /// not an error; `BrokerUnavailable` is, and the caller retries with
    /// backoff.
    async fn dequeue(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, ConveyorError>;
}
