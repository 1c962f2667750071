//! Pre-flight: balances, authorizations and vault parameters.
//!
//! Nothing here is fatal on its own. Failures are recorded on the actor and
//! reported as events; [`Preparer::ensure_ready`] is the only gate.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::actor::{Actor, ActorRegistry, StatusCell};
use crate::connection::{Connection, OperationReceipt, Query, VaultMode, VaultState};
use crate::dispatch::{Dispatcher, approve_operation};
use crate::error::{EngineError, Result};
use crate::events::{EventSink, RunEvent};
use crate::retry::RetryPolicy;
use crate::upstream::UpstreamSelector;

/// Result of [`Preparer::inspect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inspection {
    /// Balance covers the amount.
    pub sufficient: usize,
    pub insufficient: usize,
    /// Balance or allowance could not be read.
    pub unreadable: usize,
    /// Allowance already covers the amount.
    pub authorized: usize,
}

/// Vault parameters plus anything that looks wrong about them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultCheck {
    pub state: VaultState,
    pub warnings: Vec<String>,
}

impl VaultCheck {
    /// Compare the vault against `actors` deposits of `amount` each.
    pub fn evaluate(state: VaultState, amount: u128, actors: usize) -> Self {
        let mut warnings = Vec::new();
        if state.mode != VaultMode::Deposit {
            warnings.push(format!("vault is not in Deposit mode (current: {})", state.mode));
        }
        if state.max_deposit_per_actor < amount {
            warnings.push(format!(
                "amount {} exceeds the per-depositor limit {}",
                amount, state.max_deposit_per_actor
            ));
        }
        let requested = amount.saturating_mul(actors as u128);
        let headroom = state.max_total_assets.saturating_sub(state.total_assets);
        if requested > headroom {
            warnings.push(format!(
                "requested {} exceeds remaining vault capacity {}",
                requested, headroom
            ));
        }
        Self { state, warnings }
    }
}

/// Runs the pre-flight phases for a fixed per-actor amount.
pub struct Preparer {
    upstream: Arc<UpstreamSelector>,
    dispatcher: Dispatcher,
    sink: Arc<dyn EventSink>,
    amount: u128,
}

impl Preparer {
    pub fn new(
        upstream: Arc<UpstreamSelector>,
        retry: RetryPolicy,
        sink: Arc<dyn EventSink>,
        amount: u128,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(upstream.clone(), retry, sink.clone()),
            upstream,
            sink,
            amount,
        }
    }

    pub fn amount(&self) -> u128 {
        self.amount
    }

    /// Read balance and allowance for every actor concurrently.
    pub async fn inspect(&self, registry: &mut ActorRegistry) -> Inspection {
        let results = join_all(registry.cells_mut().map(|cell| self.inspect_one(cell))).await;

        let mut inspection = Inspection::default();
        for (readable, sufficient, authorized) in results {
            match (readable, sufficient) {
                (false, _) => inspection.unreadable += 1,
                (true, true) => inspection.sufficient += 1,
                (true, false) => inspection.insufficient += 1,
            }
            if authorized {
                inspection.authorized += 1;
            }
        }
        info!(
            sufficient = inspection.sufficient,
            insufficient = inspection.insufficient,
            unreadable = inspection.unreadable,
            "Balance check complete"
        );
        inspection
    }

    async fn inspect_one(&self, mut cell: StatusCell<'_>) -> (bool, bool, bool) {
        let actor = cell.actor();
        let connection = self.upstream.current();
        let reads = futures::try_join!(
            connection.read(Some(actor), Query::Balance),
            connection.read(Some(actor), Query::Allowance),
        )
        .and_then(|(balance, allowance)| Ok((balance.into_amount()?, allowance.into_amount()?)));

        match reads {
            Ok((balance, allowance)) => {
                cell.record_balance(balance);
                cell.record_allowance(allowance, self.amount);
                let sufficient = cell.status().has_balance(self.amount);
                if !sufficient {
                    warn!(actor = %actor, balance, required = self.amount, "Insufficient balance");
                }
                self.sink.emit(RunEvent::ActorInspected {
                    position: actor.position,
                    actor: actor.id.clone(),
                    balance: Some(balance),
                    allowance: Some(allowance),
                    sufficient,
                    error: None,
                });
                (true, sufficient, cell.status().authorized)
            }
            Err(err) => {
                let err = EngineError::from(err);
                warn!(actor = %actor, error = %err, "Balance check failed");
                cell.record_error(&err);
                self.sink.emit(RunEvent::ActorInspected {
                    position: actor.position,
                    actor: actor.id.clone(),
                    balance: None,
                    allowance: None,
                    sufficient: false,
                    error: Some(err.to_string()),
                });
                (false, false, false)
            }
        }
    }

    /// Approve the vault for every actor that has the balance but lacks the
    /// allowance. Returns the number of actors authorized afterwards.
    pub async fn authorize(&self, registry: &mut ActorRegistry) -> usize {
        let pending = registry
            .iter()
            .filter(|(_, s)| s.has_balance(self.amount) && !s.authorized)
            .count();
        if pending == 0 {
            info!("Every funded actor already has a sufficient allowance");
        } else {
            info!(pending, "Approving vault");
            let factory = approve_operation(self.amount);
            join_all(
                registry
                    .cells_mut()
                    .filter(|cell| {
                        let status = cell.status();
                        status.has_balance(self.amount) && !status.authorized
                    })
                    .map(|cell| self.authorize_one(cell, &factory)),
            )
            .await;
        }

        let authorized = registry.iter().filter(|(_, s)| s.authorized).count();
        info!(authorized, total = registry.len(), "Approval pass complete");
        authorized
    }

    async fn authorize_one<F, Fut>(&self, mut cell: StatusCell<'_>, factory: &F)
    where
        F: Fn(Arc<dyn Connection>, Actor) -> Fut,
        Fut: Future<Output = Result<OperationReceipt>>,
    {
        let actor = cell.actor();
        match self.dispatcher.run_for(actor, "approve", factory).await {
            Ok(receipt) => {
                info!(actor = %actor, handle = %receipt.handle, "Approval confirmed");
                cell.record_authorized(self.amount);
                self.sink.emit(RunEvent::ActorAuthorized {
                    position: actor.position,
                    actor: actor.id.clone(),
                    succeeded: true,
                    handle: Some(receipt.handle),
                    error: None,
                });
            }
            Err(err) => {
                warn!(actor = %actor, error = %err, "Approval failed");
                cell.record_error(&err);
                self.sink.emit(RunEvent::ActorAuthorized {
                    position: actor.position,
                    actor: actor.id.clone(),
                    succeeded: false,
                    handle: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    /// Read the vault parameters as seen by the first actor.
    ///
    /// Returns `None` when the read fails; that is reported, not fatal.
    pub async fn vault_state(&self, registry: &ActorRegistry) -> Option<VaultCheck> {
        let subject = registry.actors().next();
        let result = self
            .upstream
            .current()
            .read(subject, Query::VaultState)
            .await
            .and_then(|value| value.into_vault());

        match result {
            Ok(state) => {
                let check = VaultCheck::evaluate(state, self.amount, registry.len());
                info!(mode = %check.state.mode, "Vault state read");
                for warning in &check.warnings {
                    warn!("{}", warning);
                }
                self.sink.emit(RunEvent::VaultInspected {
                    state: check.state.clone(),
                    warnings: check.warnings.clone(),
                });
                Some(check)
            }
            Err(err) => {
                warn!(error = %err, "Vault state unavailable");
                self.sink.emit(RunEvent::VaultUnavailable {
                    error: err.to_string(),
                });
                None
            }
        }
    }

    /// Fail with [`EngineError::NoReadyActors`] unless at least one actor is
    /// funded and authorized. Returns the ready count.
    pub fn ensure_ready(&self, registry: &ActorRegistry) -> Result<usize> {
        let ready = registry.ready_count(self.amount);
        if ready == 0 {
            return Err(EngineError::NoReadyActors);
        }
        info!(ready, total = registry.len(), "Actors ready");
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::actor::{ActorId, CredentialHandle};
    use crate::connection::WriteOp;
    use crate::events::EventLog;
    use crate::testing::ScriptedConnection;

    fn registry(n: usize) -> ActorRegistry {
        ActorRegistry::from_actors(
            (0..n)
                .map(|i| {
                    Actor::new(
                        i,
                        ActorId::new(format!("0x{:040x}", i + 1)),
                        CredentialHandle::new(i),
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    fn preparer(connection: Arc<ScriptedConnection>, log: &EventLog) -> Preparer {
        Preparer::new(
            Arc::new(UpstreamSelector::new(connection, None)),
            RetryPolicy::new(3, Duration::from_millis(10)),
            Arc::new(log.clone()),
            1_000,
        )
    }

    fn vault(mode: VaultMode) -> VaultState {
        VaultState {
            mode,
            max_deposit_per_actor: 100_000,
            deposit_start: 0,
            deposit_end: 0,
            total_assets: 0,
            max_total_assets: 1_000_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspect_records_balances() {
        let connection = Arc::new(
            ScriptedConnection::new("primary")
                .with_balance(0, 5_000)
                .with_allowance(0, 1_000)
                .with_balance(1, 10)
                .with_allowance(1, 0),
        );
        let log = EventLog::new();
        let mut registry = registry(3);

        let inspection = preparer(connection, &log).inspect(&mut registry).await;

        assert_eq!(
            inspection,
            Inspection {
                sufficient: 1,
                insufficient: 1,
                unreadable: 1,
                authorized: 1,
            }
        );
        assert!(registry.status(0).unwrap().is_ready(1_000));
        assert!(registry.status(2).unwrap().last_error.is_some());
        assert_eq!(log.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorize_only_funded_unapproved() {
        let connection = Arc::new(
            ScriptedConnection::new("primary")
                .with_balance(0, 5_000)
                .with_allowance(0, 0)
                .with_balance(1, 5_000)
                .with_allowance(1, 1_000)
                .with_balance(2, 1)
                .with_allowance(2, 0),
        );
        let log = EventLog::new();
        let mut registry = registry(3);
        let preparer = preparer(connection.clone(), &log);

        preparer.inspect(&mut registry).await;
        let authorized = preparer.authorize(&mut registry).await;

        assert_eq!(authorized, 2);
        assert_eq!(
            connection.submissions(),
            vec![(0, WriteOp::Approve { amount: 1_000 })]
        );
        assert_eq!(preparer.ensure_ready(&registry).unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_approval_is_recorded() {
        let connection = Arc::new(
            ScriptedConnection::new("primary")
                .with_balance(0, 5_000)
                .with_allowance(0, 0)
                .reverting(0),
        );
        let log = EventLog::new();
        let mut registry = registry(1);
        let preparer = preparer(connection.clone(), &log);

        preparer.inspect(&mut registry).await;
        assert_eq!(preparer.authorize(&mut registry).await, 0);
        assert_eq!(connection.submissions().len(), 3);
        assert!(matches!(
            preparer.ensure_ready(&registry),
            Err(EngineError::NoReadyActors)
        ));
        assert!(log.events().iter().any(|e| matches!(
            e,
            RunEvent::ActorAuthorized {
                succeeded: false,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_vault_warnings() {
        let connection =
            Arc::new(ScriptedConnection::new("primary").with_vault(vault(VaultMode::Idle)));
        let log = EventLog::new();
        let check = preparer(connection, &log)
            .vault_state(&registry(1))
            .await
            .unwrap();
        assert_eq!(check.warnings.len(), 1);
        assert!(check.warnings[0].contains("Idle"));

        let check = VaultCheck::evaluate(vault(VaultMode::Deposit), 200_000, 10);
        assert_eq!(check.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_vault_unavailable_is_not_fatal() {
        let connection = Arc::new(ScriptedConnection::new("primary"));
        let log = EventLog::new();
        assert!(preparer(connection, &log).vault_state(&registry(1)).await.is_none());
        assert!(matches!(log.events()[0], RunEvent::VaultUnavailable { .. }));
    }
}
