//! Error types and alloy error classification.

use alloy::transports::{RpcError, TransportError};
use dispatch_engine::UpstreamError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvmError>;

/// Setup errors: keys, addresses, amounts, endpoints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvmError {
    #[error("no private keys provided")]
    NoKeys,

    #[error("private key #{index} is invalid: {reason}")]
    InvalidKey { index: usize, reason: String },

    #[error("private key #{index} controls the same address as key #{first}")]
    DuplicateKey { index: usize, first: usize },

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    #[error("RPC handshake failed: {0}")]
    Handshake(String),
}

/// Map a provider error onto the engine's classification.
///
/// An error response from the node means it understood and refused the
/// request; anything else is the transport's fault.
pub(crate) fn classify_transport(err: TransportError) -> UpstreamError {
    match err {
        RpcError::ErrorResp(payload) => UpstreamError::Rejected(payload.to_string()),
        RpcError::DeserError { err, .. } => UpstreamError::Decode(err.to_string()),
        RpcError::NullResp => UpstreamError::Decode("null response".to_string()),
        other => UpstreamError::Transport(other.to_string()),
    }
}

pub(crate) fn classify_contract(err: alloy::contract::Error) -> UpstreamError {
    match err {
        alloy::contract::Error::TransportError(err) => classify_transport(err),
        other => UpstreamError::Decode(other.to_string()),
    }
}
