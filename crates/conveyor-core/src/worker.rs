//! Worker pool runtime: N concurrent executors over the broker.
//!
//! Each executor loops dequeue -> execute -> report -> ack/nack. State is
//! shared only through the coordinator's atomic transition; executors
//! never talk to each other.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::{Broker, Delivery};
use crate::coordinator::Coordinator;
use crate::domain::{ExecutionStatus, FailureInfo, Transition};
use crate::error::ConveyorError;
use crate::runtime::{ExecutionContext, WorkflowRunner};

/// Pool tuning, read once at process start.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Queue the executors consume from.
    pub queue: String,

    /// Number of concurrent executors.
    pub concurrency: usize,

    /// Attempt ceiling, counting the first attempt. Once an execution has
    /// failed this many times it goes FAILED with MaxRetriesExceeded.
    pub max_attempts: u32,

    /// Deadline for one run of the workflow logic.
    pub execution_timeout: Duration,

    /// How long one dequeue call blocks before coming up empty. Liveness
    /// knob only: it bounds shutdown latency, not correctness.
    pub dequeue_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            queue: "executions".to_string(),
            concurrency: 4,
            max_attempts: 3,
            execution_timeout: Duration::from_secs(300),
            dequeue_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to a running pool.
/// - `request_shutdown()` stops taking new leases; in-flight work finishes.
/// - `shutdown_and_join()` waits for all executors to exit.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        config: WorkerPoolConfig,
        broker: Arc<dyn Broker>,
        coordinator: Arc<Coordinator>,
        runner: Arc<dyn WorkflowRunner>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(config.concurrency);
        for worker_id in 0..config.concurrency {
            let cfg = config.clone();
            let broker = Arc::clone(&broker);
            let coordinator = Arc::clone(&coordinator);
            let runner = Arc::clone(&runner);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                executor_loop(worker_id, cfg, broker, coordinator, runner, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    /// Stop taking new work. Does not cancel in-flight executions.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn executor_loop(
    worker_id: usize,
    config: WorkerPoolConfig,
    broker: Arc<dyn Broker>,
    coordinator: Arc<Coordinator>,
    runner: Arc<dyn WorkflowRunner>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    tracing::debug!(worker_id, queue = %config.queue, "executor started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // dequeue blocks, so race it against shutdown.
        let dequeued = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            dequeued = broker.dequeue(&config.queue, config.dequeue_timeout) => dequeued,
        };

        let delivery = match dequeued {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue, // timeout, not an error
            Err(err) => {
                tracing::warn!(worker_id, error = %err, "dequeue failed, backing off");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        if let Err(err) = process_delivery(&config, &coordinator, &runner, delivery).await {
            tracing::error!(worker_id, error = %err, "delivery processing failed");
        }
    }

    tracing::debug!(worker_id, "executor stopped");
}

/// Handle one delivered envelope end to end.
///
/// At-least-once discipline: the record transition is written before the
/// broker acknowledgment, so a crash between the two leads to a redelivery
/// that finds the record already settled and skips.
async fn process_delivery(
    config: &WorkerPoolConfig,
    coordinator: &Arc<Coordinator>,
    runner: &Arc<dyn WorkflowRunner>,
    delivery: Box<dyn Delivery>,
) -> Result<(), ConveyorError> {
    let envelope = delivery.envelope().clone();
    let execution_id = envelope.execution_id();

    // Snapshot before claiming: cancelled or finished executions are
    // skipped without ever entering RUNNING.
    let snapshot = match coordinator.get_status(execution_id).await {
        Ok(record) => record,
        Err(ConveyorError::UnknownExecution(_)) => {
            tracing::warn!(%execution_id, "envelope for unknown execution, dropping");
            return delivery.ack().await;
        }
        Err(err) => {
            // Store hiccup: leave the message for redelivery.
            delivery.nack(true).await?;
            return Err(err);
        }
    };

    if snapshot.status == ExecutionStatus::Cancelled {
        tracing::info!(%execution_id, "skipping cancelled execution");
        return delivery.ack().await;
    }
    if snapshot.status.is_terminal() {
        tracing::debug!(%execution_id, status = %snapshot.status, "duplicate delivery of settled execution");
        return delivery.ack().await;
    }

    // Claim. A redelivered message may re-claim a record stranded in
    // RUNNING by a dead executor; a first delivery must not.
    let claimed = match coordinator
        .apply_transition(
            execution_id,
            Transition::Started {
                redelivered: delivery.redelivered(),
            },
        )
        .await
    {
        Ok(record) => record,
        Err(ConveyorError::InvalidTransition { .. }) => {
            tracing::debug!(%execution_id, "claim rejected, another executor owns it");
            return delivery.ack().await;
        }
        Err(err) => {
            delivery.nack(true).await?;
            return Err(err);
        }
    };

    // A cancel request that raced the claim (or survived a crash) wins
    // before any work happens.
    if claimed.cancel_requested {
        coordinator
            .apply_transition(execution_id, Transition::Cancelled)
            .await?;
        return delivery.ack().await;
    }

    let flow = match coordinator.flow(envelope.flow_id()).await {
        Ok(flow) => flow,
        Err(err @ ConveyorError::UnknownFlow(_)) => {
            // Definitions are immutable, so this never heals; fail terminally.
            coordinator
                .apply_transition(
                    execution_id,
                    Transition::Failed {
                        failure: FailureInfo::execution(err.to_string(), claimed.attempt_count),
                    },
                )
                .await?;
            return delivery.nack(false).await;
        }
        Err(err) => {
            delivery.nack(true).await?;
            return Err(err);
        }
    };

    let token = coordinator.register_cancellation(execution_id);
    let ctx = ExecutionContext::new(execution_id, claimed.attempt_count, token.clone());

    tracing::info!(
        %execution_id,
        flow_id = %envelope.flow_id(),
        attempt = claimed.attempt_count,
        "executing workflow"
    );

    let outcome = tokio::time::timeout(
        config.execution_timeout,
        runner.run(&flow, envelope.payload(), &ctx),
    )
    .await;

    coordinator.clear_cancellation(execution_id);

    match outcome {
        // Deadline exceeded: terminal, per the timeout contract.
        Err(_elapsed) => {
            let failure = FailureInfo::timeout(
                format!("execution exceeded {:?}", config.execution_timeout),
                claimed.attempt_count,
            );
            coordinator
                .apply_transition(execution_id, Transition::Failed { failure })
                .await?;
            tracing::warn!(%execution_id, "execution timed out");
            delivery.nack(false).await
        }

        Ok(Ok(result)) => {
            coordinator
                .apply_transition(execution_id, Transition::Succeeded { result })
                .await?;
            tracing::info!(%execution_id, attempt = claimed.attempt_count, "execution succeeded");
            delivery.ack().await
        }

        Ok(Err(err)) => {
            if token.is_cancelled() {
                coordinator
                    .apply_transition(execution_id, Transition::Cancelled)
                    .await?;
                tracing::info!(%execution_id, "execution cancelled cooperatively");
                return delivery.ack().await;
            }

            if claimed.attempt_count >= config.max_attempts {
                let failure =
                    FailureInfo::max_retries_exceeded(err.to_string(), claimed.attempt_count);
                coordinator
                    .apply_transition(execution_id, Transition::Failed { failure })
                    .await?;
                tracing::warn!(
                    %execution_id,
                    attempts = claimed.attempt_count,
                    "max attempts exhausted"
                );
                delivery.nack(false).await
            } else {
                coordinator
                    .apply_transition(execution_id, Transition::Requeued)
                    .await?;
                tracing::info!(
                    %execution_id,
                    attempt = claimed.attempt_count,
                    error = %err,
                    "attempt failed, scheduling retry"
                );
                delivery.nack(true).await
            }
        }
    }
}
