//! EVM upstream for the dispatch engine.
//!
//! Implements [`dispatch_engine::Connection`] over JSON-RPC with alloy: block
//! timestamps from `eth_getBlockByNumber`, balances and allowances from an
//! ERC-20 token, and approve/deposit transactions against a deposit vault.

pub mod connection;
pub mod contracts;
pub mod error;
pub mod keyring;
pub mod units;

pub use connection::{EvmConnection, EvmSettings, GasSettings, Handshake, SettlementSettings};
pub use contracts::{
    APPROVE_GAS_LIMIT, ContractAddresses, DEPOSIT_GAS_LIMIT, MAINNET_USDC, MAINNET_VAULT,
    USDC_DECIMALS, parse_address,
};
pub use error::{EvmError, Result};
pub use keyring::KeyRing;
pub use units::{format_amount, parse_amount};
