//! SCALE decoding of the raw staking storage read by the pipeline.
//!
//! Every decoder returns a tagged `Result<_, DecodeError>` so callers decide, per stage, whether
//! a malformed entry is dropped (snapshot, payee filter) or fails the surrounding operation
//! (controller resolution).
use codec::{Decode, DecodeAll};
use num_bigint::BigUint;
use snafu::{ensure, ResultExt, Snafu};
use sp_core::crypto::AccountId32;

use crate::ledger::{RawEntry, StorageItem};
use crate::model::{Address, PayeeKind, PayeeRecord, StashControllerPair};
use crate::network::Network;

/// Errors raised while decoding storage keys and values.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    /// A storage key does not belong to the expected storage item.
    #[snafu(display("storage key does not start with the {pallet}::{entry} prefix"))]
    PrefixMismatch {
        /// Pallet of the expected item.
        pallet: &'static str,
        /// Entry of the expected item.
        entry: &'static str,
    },

    /// A storage key has the wrong length for a hashed `AccountId32`.
    #[snafu(display("storage key has {found} bytes, expected {expected}"))]
    KeyLength {
        /// Expected key length.
        expected: usize,
        /// Actual key length.
        found: usize,
    },

    /// Input ended before the value was complete.
    #[snafu(display("input truncated: needed {needed} bytes, {remaining} remaining"))]
    Truncated {
        /// Bytes required by the next field.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// A value carried bytes past its last field.
    #[snafu(display("{remaining} trailing bytes after value"))]
    TrailingBytes {
        /// Bytes left over.
        remaining: usize,
    },

    /// A reward destination used an unknown enum index.
    #[snafu(display("unknown reward destination variant {index}"))]
    UnknownPayeeVariant {
        /// The variant byte.
        index: u8,
    },

    /// The underlying SCALE codec rejected the input.
    #[snafu(display("{source}"))]
    Codec {
        /// The codec error.
        source: codec::Error,
    },
}

/// Extracts the account from the full storage key of an account-keyed map.
pub fn map_key_account(item: StorageItem, key: &[u8]) -> Result<AccountId32, DecodeError> {
    let prefix = item.prefix();
    let expected = prefix.len() + item.hasher().hash_len() + 32;
    ensure!(
        key.len() == expected,
        KeyLengthSnafu {
            expected,
            found: key.len()
        }
    );
    ensure!(
        key.starts_with(&prefix),
        PrefixMismatchSnafu {
            pallet: item.pallet(),
            entry: item.entry(),
        }
    );
    account(&key[expected - 32..])
}

/// Decodes a bare `AccountId32` value with no trailing bytes.
pub fn account(value: &[u8]) -> Result<AccountId32, DecodeError> {
    <[u8; 32]>::decode_all(&mut &value[..])
        .map(AccountId32::new)
        .context(CodecSnafu)
}

/// Decodes a `RewardDestination` value.
pub fn payee_kind(value: &[u8]) -> Result<PayeeKind, DecodeError> {
    let mut input = value;
    let index = take(&mut input, 1)?[0];
    let kind = match index {
        0 => PayeeKind::Staked,
        1 => PayeeKind::Stash,
        2 => PayeeKind::Controller,
        3 => {
            account(input)?;
            return Ok(PayeeKind::Account);
        }
        4 => PayeeKind::None,
        index => return UnknownPayeeVariantSnafu { index }.fail(),
    };
    ensure!(
        input.is_empty(),
        TrailingBytesSnafu {
            remaining: input.len()
        }
    );
    Ok(kind)
}

/// Decodes the `active` balance of a `StakingLedger` value.
///
/// Only the leading `stash`, `total` and `active` fields are read.
pub fn active_stake(value: &[u8]) -> Result<BigUint, DecodeError> {
    let mut input = value;
    take(&mut input, 32)?;
    let _total = compact_biguint(&mut input)?;
    compact_biguint(&mut input)
}

/// Decodes the nonce, the first field of an `AccountInfo` value.
pub fn account_nonce(value: &[u8]) -> Result<u64, DecodeError> {
    u32::decode(&mut &value[..])
        .map(u64::from)
        .context(CodecSnafu)
}

/// Decodes a SCALE compact integer of any width into a [`BigUint`].
pub fn compact_biguint(input: &mut &[u8]) -> Result<BigUint, DecodeError> {
    let first = take(input, 1)?[0];
    match first & 0b11 {
        0b00 => Ok(BigUint::from(first >> 2)),
        0b01 => {
            let rest = take(input, 1)?;
            Ok(BigUint::from(u16::from_le_bytes([first, rest[0]]) >> 2))
        }
        0b10 => {
            let rest = take(input, 3)?;
            Ok(BigUint::from(
                u32::from_le_bytes([first, rest[0], rest[1], rest[2]]) >> 2,
            ))
        }
        _ => {
            let len = usize::from(first >> 2) + 4;
            Ok(BigUint::from_bytes_le(take(input, len)?))
        }
    }
}

/// Decodes one `Staking::Bonded` entry into a pair.
pub fn bonded_pair(network: Network, entry: &RawEntry) -> Result<StashControllerPair, DecodeError> {
    let stash = map_key_account(StorageItem::Bonded, &entry.key)?;
    let controller = account(&entry.value)?;
    Ok(StashControllerPair {
        stash: Address::from_account(&stash, network),
        controller: Address::from_account(&controller, network),
    })
}

/// Decodes one `Staking::Payee` entry.
pub fn payee_record(network: Network, entry: &RawEntry) -> Result<PayeeRecord, DecodeError> {
    let stash = map_key_account(StorageItem::Payee, &entry.key)?;
    Ok(PayeeRecord {
        stash: Address::from_account(&stash, network),
        payee_kind: payee_kind(&entry.value)?,
    })
}

fn take<'a>(input: &mut &'a [u8], needed: usize) -> Result<&'a [u8], DecodeError> {
    ensure!(
        input.len() >= needed,
        TruncatedSnafu {
            needed,
            remaining: input.len()
        }
    );
    let (head, tail) = input.split_at(needed);
    *input = tail;
    Ok(head)
}
