//! In-memory broker implementation.
//!
//! Single-process only: used by tests and by embedded deployments where
//! the API and the workers share one runtime. Messages live in memory, so
//! a process crash loses them; the sqlite broker is the durable option.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{Broker, Delivery, RetryPolicy};
use crate::domain::TaskEnvelope;
use crate::error::ConveyorError;

/// Serialized message plus its delivery history.
#[derive(Debug, Clone)]
struct Message {
    body: Vec<u8>,
    delivery_count: u32,
}

/// Entry in the redelivery heap. Ordered by availability time (earliest
/// first via reversed comparison) with a sequence tie-breaker.
struct ScheduledMessage {
    available_at: Instant,
    seq: u64,
    message: Message,
}

impl PartialEq for ScheduledMessage {
    fn eq(&self, other: &Self) -> bool {
        self.available_at == other.available_at && self.seq == other.seq
    }
}

impl Eq for ScheduledMessage {}

impl PartialOrd for ScheduledMessage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledMessage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering so BinaryHeap acts as a min-heap.
        other
            .available_at
            .cmp(&self.available_at)
            .then(other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    scheduled: BinaryHeap<ScheduledMessage>,
}

impl QueueState {
    /// Move messages whose backoff has elapsed into the ready queue.
    fn promote_scheduled(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.scheduled.peek() {
            if entry.available_at > now {
                break; // heap is sorted, nothing further is due
            }
            let entry = self.scheduled.pop().expect("peeked entry exists");
            self.ready.push_back(entry.message);
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        self.scheduled.peek().map(|entry| entry.available_at)
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    next_seq: u64,
}

/// In-memory broker: Mutex-guarded queues, a Notify for waiting
/// consumers, and a backoff heap for redelivery.
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    retry_policy: RetryPolicy,
    closed: Arc<AtomicBool>,
}

impl InMemoryBroker {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
            retry_policy,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate connection loss: every subsequent call reports
    /// `BrokerUnavailable`. Used by tests of the caller's retry path.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn check_open(&self) -> Result<(), ConveyorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConveyorError::BrokerUnavailable(
                "broker connection closed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<(), ConveyorError> {
        self.check_open()?;
        envelope.validate()?;
        let body = serde_json::to_vec(envelope)?;

        let mut state = self.state.lock().await;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(Message {
                body,
                delivery_count: 0,
            });
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &str,
        timeout: std::time::Duration,
    ) -> Result<Option<Box<dyn Delivery>>, ConveyorError> {
        let deadline = Instant::now() + timeout;

        loop {
            self.check_open()?;

            let next_wake = {
                let mut state = self.state.lock().await;
                let queue_state = state.queues.entry(queue.to_string()).or_default();
                queue_state.promote_scheduled();

                while let Some(message) = queue_state.ready.pop_front() {
                    let envelope: TaskEnvelope = match serde_json::from_slice(&message.body) {
                        Ok(env) => env,
                        Err(err) => {
                            tracing::warn!(queue, error = %err, "dropping undecodable message");
                            continue;
                        }
                    };
                    if let Err(err) = envelope.validate() {
                        tracing::warn!(queue, error = %err, "dropping invalid envelope");
                        continue;
                    }

                    return Ok(Some(Box::new(InMemoryDelivery {
                        envelope,
                        message,
                        queue: queue.to_string(),
                        state: Arc::clone(&self.state),
                        notify: Arc::clone(&self.notify),
                        retry_policy: self.retry_policy.clone(),
                    })));
                }

                queue_state.next_wake()
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wake_at = match next_wake {
                Some(at) if at < deadline => at,
                _ => deadline,
            };

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at.into()) => {}
            }
        }
    }
}

struct InMemoryDelivery {
    envelope: TaskEnvelope,
    message: Message,
    queue: String,
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    retry_policy: RetryPolicy,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn envelope(&self) -> &TaskEnvelope {
        &self.envelope
    }

    fn redelivered(&self) -> bool {
        self.message.delivery_count > 0
    }

    async fn ack(self: Box<Self>) -> Result<(), ConveyorError> {
        // The message only existed in this delivery; dropping it is the ack.
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), ConveyorError> {
        if !requeue {
            return Ok(());
        }

        let mut message = self.message;
        message.delivery_count += 1;
        let delay = self.retry_policy.next_delay(message.delivery_count);
        let available_at = Instant::now() + delay;

        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .queues
            .entry(self.queue)
            .or_default()
            .scheduled
            .push(ScheduledMessage {
                available_at,
                seq,
                message,
            });
        drop(state);

        // Wake a consumer so it can re-arm its sleep for the new entry.
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionId, FlowId};
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(20), 2.0)
    }

    fn envelope(flow: &str) -> TaskEnvelope {
        TaskEnvelope::new(
            ExecutionId::generate(),
            FlowId::new(flow),
            serde_json::json!({"n": 1}),
        )
    }

    #[tokio::test]
    async fn round_trips_through_serialization() {
        let broker = InMemoryBroker::new(fast_policy());
        let env = envelope("f1");

        broker.enqueue("work", &env).await.unwrap();
        let delivery = broker
            .dequeue("work", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(delivery.envelope().execution_id(), env.execution_id());
        assert_eq!(delivery.envelope().flow_id(), env.flow_id());
        assert_eq!(delivery.envelope().payload(), env.payload());
        assert!(!delivery.redelivered());
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn dequeue_times_out_with_none() {
        let broker = InMemoryBroker::new(fast_policy());
        let got = broker
            .dequeue("empty", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers_after_backoff() {
        let broker = InMemoryBroker::new(fast_policy());
        broker.enqueue("work", &envelope("f1")).await.unwrap();

        let delivery = broker
            .dequeue("work", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        delivery.nack(true).await.unwrap();

        // Not yet available: the backoff has not elapsed.
        let early = broker
            .dequeue("work", Duration::from_millis(5))
            .await
            .unwrap();
        assert!(early.is_none());

        let redelivery = broker
            .dequeue("work", Duration::from_millis(200))
            .await
            .unwrap()
            .unwrap();
        assert!(redelivery.redelivered());
        redelivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn nack_without_requeue_drops_the_message() {
        let broker = InMemoryBroker::new(fast_policy());
        broker.enqueue("work", &envelope("f1")).await.unwrap();

        let delivery = broker
            .dequeue("work", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        delivery.nack(false).await.unwrap();

        let got = broker
            .dequeue("work", Duration::from_millis(80))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn closed_broker_reports_unavailable() {
        let broker = InMemoryBroker::new(fast_policy());
        broker.close();

        let err = broker.enqueue("work", &envelope("f1")).await.unwrap_err();
        assert!(matches!(err, ConveyorError::BrokerUnavailable(_)));

        let err = broker
            .dequeue("work", Duration::from_millis(10))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConveyorError::BrokerUnavailable(_)));
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let broker = InMemoryBroker::new(fast_policy());
        broker.enqueue("a", &envelope("f1")).await.unwrap();

        let from_b = broker.dequeue("b", Duration::from_millis(20)).await.unwrap();
        assert!(from_b.is_none());

        let from_a = broker.dequeue("a", Duration::from_millis(20)).await.unwrap();
        assert!(from_a.is_some());
    }
}
