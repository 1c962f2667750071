//! Contract bindings and well-known addresses.

use alloy::primitives::{Address, address};
use alloy::sol;
use serde::{Deserialize, Serialize};

use crate::error::{EvmError, Result};

/// Hourglass stable vault on Ethereum mainnet.
pub const MAINNET_VAULT: Address = address!("0xd9b2CB2FBAD204Fc548787EF56B918c845FCce40");

/// USDC on Ethereum mainnet.
pub const MAINNET_USDC: Address = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

pub const USDC_DECIMALS: u8 = 6;

/// Gas limit for `approve`.
pub const APPROVE_GAS_LIMIT: u64 = 100_000;

/// Gas limit for `deposit`.
pub const DEPOSIT_GAS_LIMIT: u64 = 300_000;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

sol! {
    #[sol(rpc)]
    interface IDepositVault {
        function deposit(uint256 assets, address receiver) external returns (uint256);
        function maxDeposit(address owner) external view returns (uint256);
        function operationalMode() external view returns (uint8);
        function depositStart() external view returns (uint64);
        function depositEnd() external view returns (uint64);
        function totalAssets() external view returns (uint256);
        function maxTotalAssets() external view returns (uint256);
    }
}

/// Token and vault the connection operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    pub vault: Address,
    pub token: Address,
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            vault: MAINNET_VAULT,
            token: MAINNET_USDC,
        }
    }
}

impl ContractAddresses {
    pub fn parse(vault: &str, token: &str) -> Result<Self> {
        Ok(Self {
            vault: parse_address(vault)?,
            token: parse_address(token)?,
        })
    }
}

pub fn parse_address(raw: &str) -> Result<Address> {
    raw.trim()
        .parse()
        .map_err(|_| EvmError::InvalidAddress(raw.to_string()))
}
