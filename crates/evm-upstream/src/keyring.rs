//! Private keys, their addresses, and the wallet that signs for them.

use std::fmt;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use dispatch_engine::{Actor, ActorId, ActorSource, CredentialHandle};

use crate::error::{EvmError, Result};

/// Ordered set of signing keys. Position `i` becomes actor `i`.
#[derive(Clone)]
pub struct KeyRing {
    signers: Vec<PrivateKeySigner>,
}

impl KeyRing {
    /// Parse hex private keys, with or without `0x`. Blank entries are skipped.
    ///
    /// Errors name keys by their 1-based position in `keys`, blanks included.
    pub fn parse<S: AsRef<str>>(keys: &[S]) -> Result<Self> {
        let mut signers: Vec<PrivateKeySigner> = Vec::with_capacity(keys.len());
        let mut positions: Vec<usize> = Vec::with_capacity(keys.len());
        for (index, raw) in keys
            .iter()
            .map(|k| k.as_ref().trim())
            .enumerate()
            .filter(|(_, k)| !k.is_empty())
        {
            let signer: PrivateKeySigner = raw.parse().map_err(|e| EvmError::InvalidKey {
                index: index + 1,
                reason: format!("{}", e),
            })?;
            if let Some(first) = signers.iter().position(|s| s.address() == signer.address()) {
                return Err(EvmError::DuplicateKey {
                    index: index + 1,
                    first: positions[first] + 1,
                });
            }
            signers.push(signer);
            positions.push(index);
        }
        if signers.is_empty() {
            return Err(EvmError::NoKeys);
        }
        Ok(Self { signers })
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.signers.iter().map(|s| s.address()).collect()
    }

    /// Address behind a credential handle.
    pub fn address_of(&self, credential: CredentialHandle) -> Option<Address> {
        self.signers.get(credential.index()).map(|s| s.address())
    }

    /// Wallet holding every key; the first key is the default signer.
    pub fn wallet(&self) -> EthereumWallet {
        let mut signers = self.signers.iter().cloned();
        // `parse` guarantees at least one signer.
        let mut wallet = match signers.next() {
            Some(first) => EthereumWallet::new(first),
            None => EthereumWallet::default(),
        };
        for signer in signers {
            wallet.register_signer(signer);
        }
        wallet
    }
}

impl ActorSource for KeyRing {
    fn actors(&self) -> Vec<Actor> {
        self.signers
            .iter()
            .enumerate()
            .map(|(i, s)| {
                Actor::new(
                    i,
                    ActorId::new(s.address().to_string()),
                    CredentialHandle::new(i),
                )
            })
            .collect()
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("addresses", &self.addresses())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::network::{Ethereum, NetworkWallet};

    // Well-known development keys (anvil accounts 0 and 1).
    const KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const KEY_1: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    #[test]
    fn test_parse_keys_in_order() {
        let ring = KeyRing::parse(&[KEY_0, "  ", KEY_1]).unwrap();
        assert_eq!(ring.len(), 2);

        let actors = ring.actors();
        assert_eq!(actors[0].position, 0);
        assert_eq!(
            actors[0].id.as_str(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        assert_eq!(
            actors[1].id.as_str(),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        );
        assert_eq!(
            ring.address_of(CredentialHandle::new(1)),
            Some(ring.addresses()[1])
        );
        assert_eq!(ring.address_of(CredentialHandle::new(2)), None);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(KeyRing::parse::<&str>(&[]).unwrap_err(), EvmError::NoKeys);
        assert!(matches!(
            KeyRing::parse(&["0xdeadbeef"]),
            Err(EvmError::InvalidKey { index: 1, .. })
        ));
        assert_eq!(
            KeyRing::parse(&[KEY_0, KEY_0]).unwrap_err(),
            EvmError::DuplicateKey { index: 2, first: 1 }
        );
    }

    #[test]
    fn test_error_positions_count_blank_entries() {
        assert!(matches!(
            KeyRing::parse(&[KEY_0, "", "0xdeadbeef"]),
            Err(EvmError::InvalidKey { index: 3, .. })
        ));
        assert_eq!(
            KeyRing::parse(&["", KEY_0, " ", KEY_0]).unwrap_err(),
            EvmError::DuplicateKey { index: 4, first: 2 }
        );
    }

    #[test]
    fn test_debug_hides_keys() {
        let ring = KeyRing::parse(&[KEY_0]).unwrap();
        let debug = format!("{:?}", ring);
        assert!(!debug.contains("ac0974bec39a17e36ba4a6b4d238ff944bacb478"));
        assert!(debug.contains("KeyRing"));
    }

    #[test]
    fn test_wallet_holds_every_signer() {
        let ring = KeyRing::parse(&[KEY_0, KEY_1]).unwrap();
        let wallet = ring.wallet();
        for address in ring.addresses() {
            assert!(NetworkWallet::<Ethereum>::has_signer_for(&wallet, &address));
        }
    }
}
