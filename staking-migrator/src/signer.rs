use std::str::FromStr;

use snafu::ResultExt;
use sp_core::crypto::AccountId32;
use subxt_signer::sr25519::Keypair;
use subxt_signer::SecretUri;

use crate::error::*;
use crate::model::Address;
use crate::network::Network;

/// The account that signs migration batches on one network.
#[derive(Clone)]
pub struct Signer {
    /// sr25519 keypair derived from the phrase.
    keypair: Keypair,
    /// Address of the keypair on its network.
    address: Address,
}

impl Signer {
    /// Derives the per-network signing key `<phrase>//<network>`.
    pub fn from_phrase(phrase: &str, network: Network) -> Result<Self> {
        let uri = SecretUri::from_str(&format!("{phrase}{}", network.derivation_suffix()))
            .context(SecretUriParseSnafu)?;
        let keypair = Keypair::from_uri(&uri).context(KeypairCreationSnafu)?;
        Ok(Self::new(keypair, network))
    }

    /// Wraps an existing keypair.
    pub fn new(keypair: Keypair, network: Network) -> Self {
        let account = AccountId32::new(keypair.public_key().0);
        Self {
            address: Address::from_account(&account, network),
            keypair,
        }
    }

    /// The sr25519 keypair used for signing.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// The signer's address on its network.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The signer's raw account id.
    pub fn account_id(&self) -> AccountId32 {
        AccountId32::new(self.keypair.public_key().0)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
