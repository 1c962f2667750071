//! Scripted in-memory connection for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::actor::Actor;
use crate::connection::{
    BlockSample, Connection, OperationHandle, Query, ReadValue, Settlement, VaultState, WriteOp,
};
use crate::error::UpstreamError;

pub(crate) struct ScriptedConnection {
    label: String,
    samples: Mutex<VecDeque<Result<u64, UpstreamError>>>,
    last: Mutex<Option<BlockSample>>,
    polls: AtomicUsize,
    balances: Mutex<HashMap<usize, u128>>,
    allowances: Mutex<HashMap<usize, u128>>,
    vault: Mutex<Option<VaultState>>,
    failures_left: Mutex<HashMap<usize, u32>>,
    reverting: Mutex<HashSet<usize>>,
    unsettled: Mutex<HashSet<usize>>,
    submissions: Mutex<Vec<(usize, WriteOp)>>,
    handles: Mutex<HashMap<String, usize>>,
}

impl ScriptedConnection {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            samples: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            polls: AtomicUsize::new(0),
            balances: Mutex::new(HashMap::new()),
            allowances: Mutex::new(HashMap::new()),
            vault: Mutex::new(None),
            failures_left: Mutex::new(HashMap::new()),
            reverting: Mutex::new(HashSet::new()),
            unsettled: Mutex::new(HashSet::new()),
            submissions: Mutex::new(Vec::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Timestamps returned by successive `latest_block` calls. The last one
    /// repeats once the script runs out.
    pub(crate) fn with_timestamps(self, timestamps: &[u64]) -> Self {
        self.samples.lock().extend(timestamps.iter().copied().map(Ok));
        self
    }

    pub(crate) fn with_poll_error(self) -> Self {
        self.samples
            .lock()
            .push_back(Err(UpstreamError::Transport("connection refused".into())));
        self
    }

    pub(crate) fn with_balance(self, position: usize, amount: u128) -> Self {
        self.balances.lock().insert(position, amount);
        self
    }

    pub(crate) fn with_allowance(self, position: usize, amount: u128) -> Self {
        self.allowances.lock().insert(position, amount);
        self
    }

    pub(crate) fn with_vault(self, state: VaultState) -> Self {
        *self.vault.lock() = Some(state);
        self
    }

    /// The first `n` submissions for this actor fail with a transport error.
    pub(crate) fn failing_submits(self, position: usize, n: u32) -> Self {
        self.failures_left.lock().insert(position, n);
        self
    }

    /// Every operation of this actor settles as failed.
    pub(crate) fn reverting(self, position: usize) -> Self {
        self.reverting.lock().insert(position);
        self
    }

    /// Operations of this actor are accepted but never confirmed.
    pub(crate) fn unsettled(self, position: usize) -> Self {
        self.unsettled.lock().insert(position);
        self
    }

    pub(crate) fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub(crate) fn submissions(&self) -> Vec<(usize, WriteOp)> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn label(&self) -> &str {
        &self.label
    }

    async fn latest_block(&self) -> Result<BlockSample, UpstreamError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) as u64;
        let next = self.samples.lock().pop_front();
        match next {
            Some(Ok(timestamp)) => {
                let sample = BlockSample {
                    number: n,
                    timestamp,
                };
                *self.last.lock() = Some(sample);
                Ok(sample)
            }
            Some(Err(err)) => Err(err),
            None => (*self.last.lock())
                .ok_or_else(|| UpstreamError::Transport("no samples scripted".into())),
        }
    }

    async fn read(&self, actor: Option<&Actor>, query: Query) -> Result<ReadValue, UpstreamError> {
        let position = actor.map(|a| a.position);
        let lookup = |map: &Mutex<HashMap<usize, u128>>| {
            position
                .and_then(|p| map.lock().get(&p).copied())
                .map(ReadValue::Amount)
                .ok_or_else(|| UpstreamError::Transport("read failed".into()))
        };
        match query {
            Query::Balance => lookup(&self.balances),
            Query::Allowance => lookup(&self.allowances),
            Query::VaultState => self
                .vault
                .lock()
                .clone()
                .map(ReadValue::Vault)
                .ok_or_else(|| UpstreamError::Transport("vault unavailable".into())),
        }
    }

    async fn submit(&self, actor: &Actor, op: WriteOp) -> Result<OperationHandle, UpstreamError> {
        {
            let mut failures = self.failures_left.lock();
            if let Some(left) = failures.get_mut(&actor.position)
                && *left > 0
            {
                *left -= 1;
                return Err(UpstreamError::Transport("timeout".into()));
            }
        }
        let mut submissions = self.submissions.lock();
        submissions.push((actor.position, op));
        let handle = format!("{}-0x{:04x}", self.label, submissions.len());
        self.handles.lock().insert(handle.clone(), actor.position);
        Ok(OperationHandle::new(handle))
    }

    async fn await_settlement(
        &self,
        handle: &OperationHandle,
    ) -> Result<Settlement, UpstreamError> {
        let position = self
            .handles
            .lock()
            .get(handle.as_str())
            .copied()
            .ok_or_else(|| UpstreamError::Decode("unknown handle".into()))?;
        if self.unsettled.lock().contains(&position) {
            return Err(UpstreamError::SettlementTimeout {
                handle: handle.to_string(),
                detail: "no receipt".into(),
            });
        }
        let success = !self.reverting.lock().contains(&position);
        Ok(Settlement {
            success,
            detail: format!("settled on {}", self.label),
        })
    }
}
