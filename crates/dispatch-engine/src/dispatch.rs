//! Concurrent per-actor dispatch.
//!
//! Every actor's operation starts at the same time and runs its own retry
//! loop. Outcomes are written through each actor's [`StatusCell`], so one
//! actor's retries never delay or overwrite another's result.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, join_all};
use tracing::{error, info, warn};

use crate::actor::{Actor, ActorRegistry, StatusCell};
use crate::connection::{Connection, OperationHandle, OperationReceipt, WriteOp};
use crate::error::{EngineError, Result};
use crate::events::{EventSink, RunEvent};
use crate::retry::RetryPolicy;
use crate::upstream::{FailoverOutcome, UpstreamSelector};

/// Counts after a dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl DispatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Submit `op` for `actor` and wait for it to settle.
///
/// A settled-but-failed operation is a rejection.
pub async fn execute(
    connection: Arc<dyn Connection>,
    actor: Actor,
    op: WriteOp,
) -> Result<OperationReceipt> {
    info!(actor = %actor, operation = op.name(), upstream = %connection.label(), "Submitting");
    let handle = connection.submit(&actor, op).await?;
    info!(actor = %actor, handle = %handle, "Submitted, waiting for settlement");

    let settlement = connection.await_settlement(&handle).await?;
    if settlement.success {
        Ok(OperationReceipt {
            handle,
            detail: settlement.detail,
        })
    } else {
        Err(EngineError::rejected(format!(
            "{} {} failed on chain ({})",
            op.name(),
            handle,
            settlement.detail
        )))
    }
}

/// Future produced by the operation factories below.
pub type OperationFuture = BoxFuture<'static, Result<OperationReceipt>>;

/// Operation factory for [`Dispatcher::dispatch`]: deposit `amount` per actor.
pub fn deposit_operation(
    amount: u128,
) -> impl Fn(Arc<dyn Connection>, Actor) -> OperationFuture + Send + Sync {
    move |connection, actor| Box::pin(execute(connection, actor, WriteOp::Deposit { amount }))
}

/// Operation factory that approves the vault to pull `amount` per actor.
pub fn approve_operation(
    amount: u128,
) -> impl Fn(Arc<dyn Connection>, Actor) -> OperationFuture + Send + Sync {
    move |connection, actor| Box::pin(execute(connection, actor, WriteOp::Approve { amount }))
}

/// Fires one operation per actor concurrently, each under its own retry loop.
pub struct Dispatcher {
    upstream: Arc<UpstreamSelector>,
    retry: RetryPolicy,
    sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(
        upstream: Arc<UpstreamSelector>,
        retry: RetryPolicy,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            upstream,
            retry,
            sink,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Dispatch to every actor in the registry and settle each one exactly
    /// once. Returns after all actors have settled.
    pub async fn dispatch<F, Fut>(
        &self,
        registry: &mut ActorRegistry,
        operation: &str,
        factory: F,
    ) -> DispatchSummary
    where
        F: Fn(Arc<dyn Connection>, Actor) -> Fut,
        Fut: Future<Output = Result<OperationReceipt>>,
    {
        info!(actors = registry.len(), operation, "Dispatching");
        let factory = &factory;
        let outcomes = join_all(
            registry
                .cells_mut()
                .map(|cell| self.dispatch_one(cell, operation, factory)),
        )
        .await;

        let summary = outcomes
            .into_iter()
            .fold(DispatchSummary::default(), |mut acc, succeeded| {
                if succeeded {
                    acc.succeeded += 1;
                } else {
                    acc.failed += 1;
                }
                acc
            });
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            operation,
            "Dispatch complete"
        );
        summary
    }

    /// Run the retry loop for one actor. Transient failures request failover
    /// before the next attempt.
    pub(crate) async fn run_for<F, Fut>(
        &self,
        actor: &Actor,
        operation: &str,
        factory: &F,
    ) -> Result<OperationReceipt>
    where
        F: Fn(Arc<dyn Connection>, Actor) -> Fut,
        Fut: Future<Output = Result<OperationReceipt>>,
    {
        let label = format!("{} {}", actor.label(), operation);
        let max_attempts = self.retry.max_attempts();
        self.retry
            .run_with(
                &label,
                || factory(self.upstream.current(), actor.clone()),
                |attempt, err| {
                    self.sink.emit(RunEvent::AttemptFailed {
                        position: actor.position,
                        actor: actor.id.clone(),
                        operation: operation.to_string(),
                        attempt,
                        max_attempts,
                        error: err.to_string(),
                    });
                    if err.is_transient() {
                        self.request_failover();
                    }
                },
            )
            .await
    }

    async fn dispatch_one<F, Fut>(
        &self,
        mut cell: StatusCell<'_>,
        operation: &str,
        factory: &F,
    ) -> bool
    where
        F: Fn(Arc<dyn Connection>, Actor) -> Fut,
        Fut: Future<Output = Result<OperationReceipt>>,
    {
        let actor = cell.actor();
        let result = self.run_for(actor, operation, factory).await;

        let (succeeded, handle, detail, settled) = match result {
            Ok(receipt) => {
                info!(actor = %actor, handle = %receipt.handle, "{} succeeded", operation);
                let handle = receipt.handle.clone();
                let detail = receipt.detail.clone();
                (true, Some(handle), detail, cell.settle_success(receipt))
            }
            Err(err) => {
                error!(actor = %actor, error = %err, "{} failed", operation);
                let detail = err.to_string();
                let handle = err.unsettled_handle().map(OperationHandle::new);
                (false, handle, detail, cell.settle_failure(&err))
            }
        };

        if let Err(err) = settled {
            warn!(actor = %actor, error = %err, "Ignoring second settlement");
            return cell.status().operation_succeeded == Some(true);
        }

        self.sink.emit(RunEvent::ActorSettled {
            position: actor.position,
            actor: actor.id.clone(),
            succeeded,
            handle,
            detail,
        });
        succeeded
    }

    fn request_failover(&self) {
        if let Ok(FailoverOutcome::Switched) = self.upstream.failover() {
            self.sink.emit(RunEvent::FailedOver {
                from: self.upstream.primary_label().to_string(),
                to: self.upstream.current().label().to_string(),
            });
        }
    }
}
