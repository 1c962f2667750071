//! Collaborator seams: the upstream connection and the actor source.
//!
//! The engine never talks to a chain directly. Everything it needs from the
//! outside world goes through [`Connection`], and the set of actors comes from
//! an [`ActorSource`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actor::Actor;
use crate::error::UpstreamError;

/// A point on the external clock: the latest block and its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSample {
    pub number: u64,
    /// Block timestamp in unix seconds.
    pub timestamp: u64,
}

/// Read-only queries the engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Token balance of the actor.
    Balance,
    /// Amount the vault is allowed to pull from the actor.
    Allowance,
    /// Global vault state.
    VaultState,
}

/// Operating mode reported by the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultMode {
    Idle,
    Deposit,
    Live,
    Withdraw,
    Unknown(u8),
}

impl From<u8> for VaultMode {
    fn from(raw: u8) -> Self {
        match raw {
            0 => VaultMode::Idle,
            1 => VaultMode::Deposit,
            2 => VaultMode::Live,
            3 => VaultMode::Withdraw,
            other => VaultMode::Unknown(other),
        }
    }
}

impl fmt::Display for VaultMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultMode::Idle => write!(f, "Idle"),
            VaultMode::Deposit => write!(f, "Deposit"),
            VaultMode::Live => write!(f, "Live"),
            VaultMode::Withdraw => write!(f, "Withdraw"),
            VaultMode::Unknown(raw) => write!(f, "Unknown({})", raw),
        }
    }
}

/// Snapshot of the vault's deposit parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultState {
    pub mode: VaultMode,
    /// Per-depositor cap, in token base units.
    pub max_deposit_per_actor: u128,
    /// Deposit window opening (unix seconds).
    pub deposit_start: u64,
    /// Deposit window closing (unix seconds).
    pub deposit_end: u64,
    pub total_assets: u128,
    pub max_total_assets: u128,
}

/// Value returned by [`Connection::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadValue {
    Amount(u128),
    Vault(VaultState),
}

impl ReadValue {
    /// Interpret the value as an amount.
    pub fn into_amount(self) -> Result<u128, UpstreamError> {
        match self {
            ReadValue::Amount(amount) => Ok(amount),
            ReadValue::Vault(_) => Err(UpstreamError::Decode(
                "expected an amount, got vault state".to_string(),
            )),
        }
    }

    /// Interpret the value as vault state.
    pub fn into_vault(self) -> Result<VaultState, UpstreamError> {
        match self {
            ReadValue::Vault(state) => Ok(state),
            ReadValue::Amount(_) => Err(UpstreamError::Decode(
                "expected vault state, got an amount".to_string(),
            )),
        }
    }
}

/// State-changing operations an actor can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// Allow the vault to pull `amount` base units.
    Approve { amount: u128 },
    /// Deposit `amount` base units into the vault for the actor.
    Deposit { amount: u128 },
}

impl WriteOp {
    pub fn name(&self) -> &'static str {
        match self {
            WriteOp::Approve { .. } => "approve",
            WriteOp::Deposit { .. } => "deposit",
        }
    }
}

/// Opaque reference to a submitted operation (a transaction hash on EVM).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle(String);

impl OperationHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Final state of a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub success: bool,
    /// Free-form detail, e.g. block number and gas used.
    pub detail: String,
}

/// What a successful operation leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReceipt {
    pub handle: OperationHandle,
    pub detail: String,
}

/// A connection to the external system.
///
/// Implementations must be cheap to share; the engine holds them behind `Arc`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Human readable endpoint label used in logs and events.
    fn label(&self) -> &str;

    /// Latest block number and timestamp.
    async fn latest_block(&self) -> Result<BlockSample, UpstreamError>;

    /// Issue a read-only query, optionally on behalf of an actor.
    async fn read(&self, actor: Option<&Actor>, query: Query) -> Result<ReadValue, UpstreamError>;

    /// Submit a state-changing operation signed by `actor`.
    async fn submit(&self, actor: &Actor, op: WriteOp) -> Result<OperationHandle, UpstreamError>;

    /// Wait until the operation's outcome is final.
    async fn await_settlement(&self, handle: &OperationHandle)
    -> Result<Settlement, UpstreamError>;
}

/// Supplies the ordered list of actors.
pub trait ActorSource {
    fn actors(&self) -> Vec<Actor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_mode_from_raw() {
        assert_eq!(VaultMode::from(0), VaultMode::Idle);
        assert_eq!(VaultMode::from(1), VaultMode::Deposit);
        assert_eq!(VaultMode::from(3), VaultMode::Withdraw);
        assert_eq!(VaultMode::from(9), VaultMode::Unknown(9));
        assert_eq!(VaultMode::from(9).to_string(), "Unknown(9)");
    }

    #[test]
    fn test_read_value_conversion() {
        assert_eq!(ReadValue::Amount(5).into_amount(), Ok(5));
        assert!(ReadValue::Amount(5).into_vault().is_err());
    }
}
