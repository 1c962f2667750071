//! JSON-RPC connection implementing the engine's [`Connection`] seam.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::network::{ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use dispatch_engine::{
    Actor, BlockSample, Connection, OperationHandle, Query, ReadValue, Settlement, UpstreamError,
    VaultState, WriteOp,
};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};
use url::Url;

use crate::contracts::{
    APPROVE_GAS_LIMIT, ContractAddresses, DEPOSIT_GAS_LIMIT, IDepositVault, IERC20,
};
use crate::error::{EvmError, classify_contract, classify_transport};
use crate::keyring::KeyRing;

/// Gas limits and optional fee overrides, fees in wei.
///
/// Without overrides the provider estimates EIP-1559 fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasSettings {
    pub approve_gas_limit: u64,
    pub deposit_gas_limit: u64,
    /// Legacy gas price. Takes precedence over the EIP-1559 fields.
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            approve_gas_limit: APPROVE_GAS_LIMIT,
            deposit_gas_limit: DEPOSIT_GAS_LIMIT,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        }
    }
}

impl GasSettings {
    fn apply(&self, mut request: TransactionRequest, op: &WriteOp) -> TransactionRequest {
        let limit = match op {
            WriteOp::Approve { .. } => self.approve_gas_limit,
            WriteOp::Deposit { .. } => self.deposit_gas_limit,
        };
        request.set_gas_limit(limit);
        if let Some(price) = self.gas_price {
            request.set_gas_price(price);
            return request;
        }
        if let Some(max_fee) = self.max_fee_per_gas {
            request.set_max_fee_per_gas(max_fee);
        }
        if let Some(tip) = self.max_priority_fee_per_gas {
            request.set_max_priority_fee_per_gas(tip);
        }
        request
    }
}

/// How long and how often to wait for a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            timeout: Duration::from_secs(180),
        }
    }
}

/// Everything an [`EvmConnection`] needs besides the keys.
#[derive(Debug, Clone)]
pub struct EvmSettings {
    pub contracts: ContractAddresses,
    pub gas: GasSettings,
    pub settlement: SettlementSettings,
}

/// Result of [`EvmConnection::handshake`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub chain_id: u64,
    pub block: BlockSample,
}

/// One RPC endpoint with every actor's key loaded into its signer.
pub struct EvmConnection {
    label: String,
    provider: DynProvider,
    keys: Arc<KeyRing>,
    settings: EvmSettings,
}

impl EvmConnection {
    /// Build a connection. No request is made until first use.
    pub fn connect(
        label: impl Into<String>,
        endpoint: Url,
        keys: Arc<KeyRing>,
        settings: EvmSettings,
    ) -> Self {
        let label = label.into();
        debug!(upstream = %label, host = ?endpoint.host_str(), "Creating RPC provider");
        let provider = ProviderBuilder::new()
            .wallet(keys.wallet())
            .connect_http(endpoint)
            .erased();
        Self {
            label,
            provider,
            keys,
            settings,
        }
    }

    /// Check the endpoint answers: chain id and latest block.
    pub async fn handshake(&self) -> Result<Handshake, EvmError> {
        let chain_id = self
            .provider
            .get_chain_id()
            .await
            .map_err(|e| EvmError::Handshake(e.to_string()))?;
        let block = self
            .latest_block()
            .await
            .map_err(|e| EvmError::Handshake(e.to_string()))?;
        info!(upstream = %self.label, chain_id, block = block.number, "RPC reachable");
        Ok(Handshake { chain_id, block })
    }

    /// Decimals reported by the token contract.
    pub async fn token_decimals(&self) -> Result<u8, UpstreamError> {
        IERC20::new(self.settings.contracts.token, &self.provider)
            .decimals()
            .call()
            .await
            .map_err(classify_contract)
    }

    fn address_of(&self, actor: &Actor) -> Result<Address, UpstreamError> {
        self.keys
            .address_of(actor.credential)
            .ok_or_else(|| UpstreamError::UnknownActor(actor.id.to_string()))
    }

    async fn vault_state(&self, receiver: Address) -> Result<VaultState, UpstreamError> {
        let vault = IDepositVault::new(self.settings.contracts.vault, &self.provider);
        let mode = vault.operationalMode();
        let max_deposit = vault.maxDeposit(receiver);
        let start = vault.depositStart();
        let end = vault.depositEnd();
        let total = vault.totalAssets();
        let max_total = vault.maxTotalAssets();

        let (mode, max_deposit, start, end, total, max_total) = tokio::try_join!(
            mode.call().into_future(),
            max_deposit.call().into_future(),
            start.call().into_future(),
            end.call().into_future(),
            total.call().into_future(),
            max_total.call().into_future(),
        )
        .map_err(classify_contract)?;

        Ok(VaultState {
            mode: mode.into(),
            max_deposit_per_actor: max_deposit.saturating_to(),
            deposit_start: start,
            deposit_end: end,
            total_assets: total.saturating_to(),
            max_total_assets: max_total.saturating_to(),
        })
    }

    fn build_request(&self, from: Address, op: &WriteOp) -> TransactionRequest {
        let contracts = self.settings.contracts;
        let request = match *op {
            WriteOp::Approve { amount } => IERC20::new(contracts.token, &self.provider)
                .approve(contracts.vault, U256::from(amount))
                .into_transaction_request(),
            WriteOp::Deposit { amount } => IDepositVault::new(contracts.vault, &self.provider)
                .deposit(U256::from(amount), from)
                .into_transaction_request(),
        };
        self.settings.gas.apply(request.with_from(from), op)
    }
}

#[async_trait]
impl Connection for EvmConnection {
    fn label(&self) -> &str {
        &self.label
    }

    async fn latest_block(&self) -> Result<BlockSample, UpstreamError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(classify_transport)?
            .ok_or_else(|| UpstreamError::Decode("latest block not returned".to_string()))?;
        Ok(BlockSample {
            number: block.header.number,
            timestamp: block.header.timestamp,
        })
    }

    async fn read(&self, actor: Option<&Actor>, query: Query) -> Result<ReadValue, UpstreamError> {
        let owner = actor.map(|a| self.address_of(a)).transpose()?;
        let token = IERC20::new(self.settings.contracts.token, &self.provider);
        match query {
            Query::Balance => {
                let owner = owner.ok_or_else(|| UpstreamError::UnknownActor("none".into()))?;
                let balance = token.balanceOf(owner).call().await.map_err(classify_contract)?;
                Ok(ReadValue::Amount(balance.saturating_to()))
            }
            Query::Allowance => {
                let owner = owner.ok_or_else(|| UpstreamError::UnknownActor("none".into()))?;
                let allowance = token
                    .allowance(owner, self.settings.contracts.vault)
                    .call()
                    .await
                    .map_err(classify_contract)?;
                Ok(ReadValue::Amount(allowance.saturating_to()))
            }
            Query::VaultState => {
                let state = self.vault_state(owner.unwrap_or(Address::ZERO)).await?;
                Ok(ReadValue::Vault(state))
            }
        }
    }

    async fn submit(&self, actor: &Actor, op: WriteOp) -> Result<OperationHandle, UpstreamError> {
        let from = self.address_of(actor)?;
        let request = self.build_request(from, &op);
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(classify_transport)?;
        let hash = *pending.tx_hash();
        info!(
            upstream = %self.label,
            actor = %actor,
            operation = op.name(),
            tx = %hash,
            "Transaction sent"
        );
        Ok(OperationHandle::new(hash.to_string()))
    }

    async fn await_settlement(
        &self,
        handle: &OperationHandle,
    ) -> Result<Settlement, UpstreamError> {
        let hash = TxHash::from_str(handle.as_str())
            .map_err(|e| UpstreamError::Decode(format!("bad transaction hash: {}", e)))?;
        let SettlementSettings {
            poll_interval,
            timeout,
        } = self.settings.settlement;
        let deadline = Instant::now() + timeout;

        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    let detail = format!(
                        "block {}, gas used {}",
                        receipt
                            .block_number()
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "?".to_string()),
                        receipt.gas_used()
                    );
                    return Ok(Settlement {
                        success: receipt.status(),
                        detail,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(tx = %hash, error = %err, "Receipt query failed, polling again");
                }
            }

            // Already broadcast, so this must not read as a transport failure.
            if Instant::now() + poll_interval > deadline {
                return Err(UpstreamError::SettlementTimeout {
                    handle: hash.to_string(),
                    detail: format!("no receipt after {:?}", timeout),
                });
            }
            sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_price_wins() {
        let gas = GasSettings {
            gas_price: Some(30_000_000_000),
            max_fee_per_gas: Some(50_000_000_000),
            ..GasSettings::default()
        };
        let request = gas.apply(TransactionRequest::default(), &WriteOp::Deposit { amount: 1 });
        assert_eq!(request.gas, Some(DEPOSIT_GAS_LIMIT));
        assert_eq!(request.gas_price, Some(30_000_000_000));
        assert_eq!(request.max_fee_per_gas, None);
    }

    #[test]
    fn test_eip1559_overrides() {
        let gas = GasSettings {
            max_fee_per_gas: Some(50_000_000_000),
            max_priority_fee_per_gas: Some(2_000_000_000),
            ..GasSettings::default()
        };
        let request = gas.apply(TransactionRequest::default(), &WriteOp::Approve { amount: 1 });
        assert_eq!(request.gas, Some(APPROVE_GAS_LIMIT));
        assert_eq!(request.max_fee_per_gas, Some(50_000_000_000));
        assert_eq!(request.max_priority_fee_per_gas, Some(2_000_000_000));
        assert_eq!(request.gas_price, None);
    }

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    /// A connection pointed at a port nothing listens on.
    fn offline(settlement: SettlementSettings) -> EvmConnection {
        let keys = Arc::new(KeyRing::parse(&[KEY]).unwrap());
        EvmConnection::connect(
            "primary",
            Url::parse("http://127.0.0.1:1").unwrap(),
            keys,
            EvmSettings {
                contracts: ContractAddresses::default(),
                gas: GasSettings::default(),
                settlement,
            },
        )
    }

    #[tokio::test]
    async fn test_unknown_actor_is_rejected_before_any_request() {
        let connection = offline(SettlementSettings::default());
        let stranger = Actor::new(
            5,
            dispatch_engine::ActorId::new("0x0"),
            dispatch_engine::CredentialHandle::new(5),
        );
        let err = connection
            .submit(&stranger, WriteOp::Deposit { amount: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::UnknownActor(_)));
    }

    #[tokio::test]
    async fn test_bad_handle_is_decode_error() {
        let connection = offline(SettlementSettings::default());
        let err = connection
            .await_settlement(&OperationHandle::new("not-a-hash"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_receipt_is_settlement_timeout() {
        let connection = offline(SettlementSettings {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::ZERO,
        });
        let hash = format!("0x{}", "ab".repeat(32));
        let err = connection
            .await_settlement(&OperationHandle::new(hash.clone()))
            .await
            .unwrap_err();
        match err {
            UpstreamError::SettlementTimeout { handle, .. } => assert_eq!(handle, hash),
            other => panic!("expected a settlement timeout, got {other:?}"),
        }
    }
}
