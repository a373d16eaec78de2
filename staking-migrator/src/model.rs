//! Core data types shared by the snapshot, analysis and migration stages.
use std::fmt;

use serde::{Deserialize, Serialize};
use sp_core::crypto::{AccountId32, Ss58Codec};

use crate::error::{Error, Result};
use crate::network::Network;

/// A network-scoped account address in its canonical SS58 form.
///
/// Two addresses are equal iff their canonical strings are equal, so every constructor
/// normalizes to the SS58 prefix of the owning network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Renders a raw account id under `network`'s SS58 prefix.
    pub fn from_account(account: &AccountId32, network: Network) -> Self {
        Address(account.to_ss58check_with_version(network.ss58_format()))
    }

    /// Parses any SS58 string and re-encodes it for `network`.
    pub fn parse(address: &str, network: Network) -> Result<Self> {
        let account = account_from_ss58(address)?;
        Ok(Self::from_account(&account, network))
    }

    /// The raw 32-byte account behind this address.
    pub fn account_id(&self) -> Result<AccountId32> {
        account_from_ss58(&self.0)
    }

    /// The canonical string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn account_from_ss58(address: &str) -> Result<AccountId32> {
    AccountId32::from_ss58check_with_version(address)
        .map(|(account, _)| account)
        .map_err(|e| Error::InvalidAddress {
            address: address.to_string(),
            message: format!("{e:?}"),
        })
}

/// A staking delegation: `controller` acts on behalf of `stash`.
///
/// Persisted as a `[stash, controller]` 2-tuple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Address, Address)", into = "(Address, Address)")]
pub struct StashControllerPair {
    /// The principal holding the bonded funds.
    pub stash: Address,
    /// The delegate authorized for operational staking calls.
    pub controller: Address,
}

impl StashControllerPair {
    /// Whether the stash still delegates to a different account.
    pub fn is_unique(&self) -> bool {
        self.stash != self.controller
    }
}

impl From<(Address, Address)> for StashControllerPair {
    fn from((stash, controller): (Address, Address)) -> Self {
        Self { stash, controller }
    }
}

impl From<StashControllerPair> for (Address, Address) {
    fn from(pair: StashControllerPair) -> Self {
        (pair.stash, pair.controller)
    }
}

/// Every bonded pair of one network, as enumerated (or as previously cached).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkSnapshot {
    /// Network the pairs were read from.
    pub network: Network,
    /// Pairs in enumeration order.
    pub pairs: Vec<StashControllerPair>,
}

/// Reward destination variants of `Staking::Payee`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayeeKind {
    /// Rewards are re-bonded.
    Staked,
    /// Rewards are paid to the stash, unbonded.
    Stash,
    /// Rewards are paid to the controller. Deprecated, these are the migration targets.
    Controller,
    /// Rewards are paid to an explicit account.
    Account,
    /// Rewards are not paid out.
    None,
}

/// The decoded payee of one stash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayeeRecord {
    /// Stash the payee belongs to.
    pub stash: Address,
    /// Reward destination of the stash.
    pub payee_kind: PayeeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_normalized_to_the_network_prefix() {
        let account = AccountId32::new([7u8; 32]);
        let generic = account.to_ss58check_with_version(Network::Westend.ss58_format());

        let polkadot = Address::parse(&generic, Network::Polkadot).unwrap();
        let kusama = Address::parse(&generic, Network::Kusama).unwrap();

        assert_eq!(polkadot, Address::from_account(&account, Network::Polkadot));
        assert_ne!(polkadot.as_str(), kusama.as_str());
        assert_eq!(polkadot.account_id().unwrap(), account);
        assert_eq!(kusama.account_id().unwrap(), account);
    }

    #[test]
    fn we_cannot_parse_garbage_addresses() {
        assert!(matches!(
            Address::parse("not-an-address", Network::Westend),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn pairs_serialize_as_two_tuples() {
        let stash = Address::from_account(&AccountId32::new([1u8; 32]), Network::Westend);
        let controller = Address::from_account(&AccountId32::new([2u8; 32]), Network::Westend);
        let pair = StashControllerPair {
            stash: stash.clone(),
            controller: controller.clone(),
        };

        let json = serde_json::to_value(&pair).unwrap();
        assert_eq!(json, serde_json::json!([stash.as_str(), controller.as_str()]));

        let back: StashControllerPair = serde_json::from_value(json).unwrap();
        assert_eq!(back, pair);
        assert!(back.is_unique());
    }
}
