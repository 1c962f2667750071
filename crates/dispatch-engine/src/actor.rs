//! Actor registry and per-actor status.
//!
//! The registry owns one [`ActorStatus`] per actor. Mutable access is only
//! handed out one actor at a time through [`StatusCell`], so concurrent work
//! over many actors never shares a status record.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::connection::{ActorSource, OperationReceipt, OperationHandle};
use crate::error::{EngineError, Result};

/// Public identifier derived from an actor's credential (an address on EVM).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form, `0x1234...abcd`. Counts characters, not bytes.
    pub fn short(&self) -> String {
        let count = self.0.chars().count();
        if count <= 12 {
            return self.0.clone();
        }
        let head: String = self.0.chars().take(6).collect();
        let tail: String = self.0.chars().skip(count - 4).collect();
        format!("{}...{}", head, tail)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference a [`Connection`](crate::Connection) resolves to a signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialHandle(usize);

impl CredentialHandle {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// One credentialed party. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// 0-based insertion order.
    pub position: usize,
    pub id: ActorId,
    pub credential: CredentialHandle,
}

impl Actor {
    pub fn new(position: usize, id: ActorId, credential: CredentialHandle) -> Self {
        Self {
            position,
            id,
            credential,
        }
    }

    /// Label used in logs, e.g. `wallet 3`.
    pub fn label(&self) -> String {
        format!("wallet {}", self.position + 1)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wallet {} ({})", self.position + 1, self.id.short())
    }
}

/// Mutable per-actor record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorStatus {
    /// Token balance, once read.
    pub ready_balance: Option<u128>,
    /// Current vault allowance, once read.
    pub allowance: Option<u128>,
    /// The vault may pull the deposit amount.
    pub authorized: bool,
    /// `None` until the dispatched operation settles.
    pub operation_succeeded: Option<bool>,
    pub result_handle: Option<OperationHandle>,
    pub result_detail: Option<String>,
    pub last_error: Option<String>,
}

impl ActorStatus {
    /// Balance covers `amount` and the vault is authorized to pull it.
    pub fn is_ready(&self, amount: u128) -> bool {
        self.authorized && self.has_balance(amount)
    }

    pub fn has_balance(&self, amount: u128) -> bool {
        self.ready_balance.is_some_and(|balance| balance >= amount)
    }
}

/// Exclusive write access to a single actor's status.
#[derive(Debug)]
pub struct StatusCell<'a> {
    actor: &'a Actor,
    status: &'a mut ActorStatus,
}

impl<'a> StatusCell<'a> {
    pub fn actor(&self) -> &'a Actor {
        self.actor
    }

    pub fn status(&self) -> &ActorStatus {
        &*self.status
    }

    pub fn record_balance(&mut self, balance: u128) {
        self.status.ready_balance = Some(balance);
    }

    pub fn record_allowance(&mut self, allowance: u128, amount: u128) {
        self.status.allowance = Some(allowance);
        self.status.authorized = allowance >= amount;
    }

    /// Mark the approval as done; the allowance now equals `amount`.
    pub fn record_authorized(&mut self, amount: u128) {
        self.status.allowance = Some(amount);
        self.status.authorized = true;
    }

    pub fn record_error(&mut self, error: &EngineError) {
        self.status.last_error = Some(error.to_string());
    }

    /// Terminal success. Fails if the actor has already settled.
    pub fn settle_success(&mut self, receipt: OperationReceipt) -> Result<()> {
        self.ensure_unsettled()?;
        self.status.operation_succeeded = Some(true);
        self.status.result_handle = Some(receipt.handle);
        self.status.result_detail = Some(receipt.detail);
        Ok(())
    }

    /// Terminal failure. Fails if the actor has already settled.
    ///
    /// An operation that was sent but never confirmed keeps its handle so it
    /// can be looked up afterwards.
    pub fn settle_failure(&mut self, error: &EngineError) -> Result<()> {
        self.ensure_unsettled()?;
        self.status.operation_succeeded = Some(false);
        self.status.result_handle = error.unsettled_handle().map(OperationHandle::new);
        self.status.last_error = Some(error.to_string());
        Ok(())
    }

    fn ensure_unsettled(&self) -> Result<()> {
        if self.status.operation_succeeded.is_some() {
            return Err(EngineError::AlreadySettled(self.actor.id.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ActorEntry {
    actor: Actor,
    status: ActorStatus,
}

/// Ordered set of actors and their status records.
#[derive(Debug, Clone, Default)]
pub struct ActorRegistry {
    entries: Vec<ActorEntry>,
}

impl ActorRegistry {
    /// Build the registry from a source, preserving its order.
    pub fn from_source(source: &dyn ActorSource) -> Result<Self> {
        Self::from_actors(source.actors())
    }

    pub fn from_actors(actors: Vec<Actor>) -> Result<Self> {
        if actors.is_empty() {
            return Err(EngineError::NoActors);
        }
        let entries = actors
            .into_iter()
            .map(|actor| ActorEntry {
                actor,
                status: ActorStatus::default(),
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Actors and statuses in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Actor, &ActorStatus)> {
        self.entries.iter().map(|e| (&e.actor, &e.status))
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.entries.iter().map(|e| &e.actor)
    }

    pub fn status(&self, position: usize) -> Option<&ActorStatus> {
        self.entries.get(position).map(|e| &e.status)
    }

    /// One exclusive cell per actor, in insertion order.
    pub fn cells_mut(&mut self) -> impl Iterator<Item = StatusCell<'_>> {
        self.entries.iter_mut().map(|e| StatusCell {
            actor: &e.actor,
            status: &mut e.status,
        })
    }

    /// Actors whose balance covers `amount` and whose vault allowance is set.
    pub fn ready_count(&self, amount: u128) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status.is_ready(amount))
            .count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status.operation_succeeded == Some(true))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status.operation_succeeded == Some(false))
            .count()
    }
}

/// Registry plus run timing.
#[derive(Debug, Clone)]
pub struct RunState {
    pub registry: ActorRegistry,
    pub started_at: DateTime<Utc>,
    started: Instant,
    completed_at: Option<DateTime<Utc>>,
    elapsed: Option<Duration>,
}

impl RunState {
    pub fn new(registry: ActorRegistry) -> Self {
        Self {
            registry,
            started_at: Utc::now(),
            started: Instant::now(),
            completed_at: None,
            elapsed: None,
        }
    }

    /// Stamp completion. Later calls keep the first stamp.
    pub fn finish(&mut self) {
        if self.completed_at.is_some() {
            return;
        }
        self.completed_at = Some(Utc::now());
        self.elapsed = Some(self.started.elapsed());
    }

    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Elapsed time between start and completion, once finished.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}
