//! The diff layer: every state change one block produced.

use dsync_crypto::keccak256;
use dsync_types::{Address, BlockHash, Hash256};
use serde::{Deserialize, Serialize};

use crate::block::Receipt;
use crate::encoding;
use crate::error::DiffError;

/// Account fields set by a block. `None` leaves the field untouched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffAccount {
    pub address: Address,
    pub nonce: Option<u64>,
    pub balance: Option<u128>,
    pub code_hash: Option<Hash256>,
}

/// One storage write. [`Hash256::ZERO`] deletes the slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStorage {
    pub address: Address,
    pub key: Hash256,
    pub value: Hash256,
}

/// Contract code introduced by a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCode {
    pub hash: Hash256,
    pub code: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLayer {
    pub block_hash: BlockHash,
    pub number: u64,
    /// In transaction order.
    pub receipts: Vec<Receipt>,
    /// Sorted by hash.
    pub codes: Vec<DiffCode>,
    /// Accounts deleted (with their storage) before `accounts` and `storage`
    /// are applied. Sorted.
    pub destructs: Vec<Address>,
    /// Sorted by address.
    pub accounts: Vec<DiffAccount>,
    /// Sorted by (address, key).
    pub storage: Vec<DiffStorage>,
    /// Keccak-256 of the encoded layer. Never serialized; always recomputed
    /// over the bytes a layer was decoded from or encoded to.
    #[serde(skip)]
    pub diff_hash: Hash256,
}

impl DiffLayer {
    /// Canonical encoding of the layer.
    pub fn encode(&self) -> Result<Vec<u8>, DiffError> {
        self.check_canonical()?;
        encoding::encode(self).map_err(|e| DiffError::Malformed(e.to_string()))
    }

    /// Strictly decode a layer received from the network.
    ///
    /// Rejects payloads over `max_size`, trailing bytes, and anything whose
    /// re-encoding is not byte-identical to `raw`. The returned layer carries
    /// the content hash of `raw`.
    pub fn decode(raw: &[u8], max_size: usize) -> Result<Self, DiffError> {
        if raw.len() > max_size {
            return Err(DiffError::TooLarge {
                size: raw.len(),
                max: max_size,
            });
        }
        let mut layer: DiffLayer = encoding::decode(raw, max_size as u64)
            .map_err(|e| DiffError::Malformed(e.to_string()))?;
        layer.check_canonical()?;
        let reencoded =
            encoding::encode(&layer).map_err(|e| DiffError::Malformed(e.to_string()))?;
        if reencoded != raw {
            return Err(DiffError::NonCanonical("re-encoding differs from payload"));
        }
        layer.diff_hash = keccak256(raw);
        Ok(layer)
    }

    /// Ordering and uniqueness rules of the canonical form.
    pub fn check_canonical(&self) -> Result<(), DiffError> {
        if !strictly_ascending(self.codes.iter().map(|c| c.hash)) {
            return Err(DiffError::NonCanonical("codes not sorted by hash"));
        }
        if self.codes.iter().any(|c| keccak256(&c.code) != c.hash) {
            return Err(DiffError::NonCanonical("code hash does not match code"));
        }
        if !strictly_ascending(self.destructs.iter().copied()) {
            return Err(DiffError::NonCanonical("destructs not sorted"));
        }
        if !strictly_ascending(self.accounts.iter().map(|a| a.address)) {
            return Err(DiffError::NonCanonical("accounts not sorted by address"));
        }
        if !strictly_ascending(self.storage.iter().map(|s| (s.address, s.key))) {
            return Err(DiffError::NonCanonical("storage not sorted by address and key"));
        }
        Ok(())
    }

    pub fn gas_used(&self) -> u64 {
        self.receipts.last().map_or(0, |r| r.cumulative_gas_used)
    }
}

fn strictly_ascending<T: Ord>(mut items: impl Iterator<Item = T>) -> bool {
    let Some(mut prev) = items.next() else {
        return true;
    };
    for item in items {
        if item <= prev {
            return false;
        }
        prev = item;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layer() -> DiffLayer {
        let code = vec![0x60, 0x00, 0x60, 0x00];
        DiffLayer {
            block_hash: BlockHash::new([7; 32]),
            number: 3,
            receipts: vec![Receipt {
                tx_hash: Hash256::repeat_byte(1),
                gas_used: 21_000,
                cumulative_gas_used: 21_000,
            }],
            codes: vec![DiffCode {
                hash: keccak256(&code),
                code,
            }],
            destructs: vec![Address::repeat_byte(9)],
            accounts: vec![
                DiffAccount {
                    address: Address::repeat_byte(1),
                    nonce: Some(1),
                    balance: Some(500),
                    code_hash: None,
                },
                DiffAccount {
                    address: Address::repeat_byte(2),
                    nonce: None,
                    balance: Some(42),
                    code_hash: None,
                },
            ],
            storage: vec![
                DiffStorage {
                    address: Address::repeat_byte(1),
                    key: Hash256::from_low_u64(1),
                    value: Hash256::from_low_u64(5),
                },
                DiffStorage {
                    address: Address::repeat_byte(1),
                    key: Hash256::from_low_u64(2),
                    value: Hash256::ZERO,
                },
            ],
            diff_hash: Hash256::ZERO,
        }
    }

    #[test]
    fn decode_recomputes_content_hash() {
        let mut layer = sample_layer();
        layer.diff_hash = Hash256::repeat_byte(0xee);
        let raw = layer.encode().unwrap();
        let decoded = DiffLayer::decode(&raw, 1 << 20).unwrap();
        assert_eq!(decoded.diff_hash, keccak256(&raw));
        assert_eq!(decoded.accounts, layer.accounts);
    }

    #[test]
    fn embedded_hash_is_not_serialized() {
        let mut a = sample_layer();
        let mut b = sample_layer();
        a.diff_hash = Hash256::repeat_byte(1);
        b.diff_hash = Hash256::repeat_byte(2);
        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn oversized_payload_is_rejected_before_decoding() {
        let raw = sample_layer().encode().unwrap();
        assert!(matches!(
            DiffLayer::decode(&raw, raw.len() - 1),
            Err(DiffError::TooLarge { .. })
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            DiffLayer::decode(&[0xff; 16], 1 << 20),
            Err(DiffError::Malformed(_))
        ));
    }

    #[test]
    fn trailing_byte_is_malformed() {
        let mut raw = sample_layer().encode().unwrap();
        raw.push(0);
        assert!(matches!(DiffLayer::decode(&raw, 1 << 20), Err(DiffError::Malformed(_))));
    }

    #[test]
    fn unsorted_accounts_are_not_canonical() {
        let mut layer = sample_layer();
        layer.accounts.reverse();
        assert!(matches!(layer.encode(), Err(DiffError::NonCanonical(_))));

        let raw = encoding::encode(&layer).unwrap();
        assert!(matches!(
            DiffLayer::decode(&raw, 1 << 20),
            Err(DiffError::NonCanonical(_))
        ));
    }

    #[test]
    fn duplicate_storage_slot_is_not_canonical() {
        let mut layer = sample_layer();
        let dup = layer.storage[0].clone();
        layer.storage.insert(1, dup);
        assert!(matches!(layer.check_canonical(), Err(DiffError::NonCanonical(_))));
    }

    #[test]
    fn code_must_match_its_hash() {
        let mut layer = sample_layer();
        layer.codes[0].code.push(0);
        assert!(matches!(layer.check_canonical(), Err(DiffError::NonCanonical(_))));
    }

    #[test]
    fn gas_used_is_last_cumulative() {
        assert_eq!(sample_layer().gas_used(), 21_000);
        let mut empty = sample_layer();
        empty.receipts.clear();
        assert_eq!(empty.gas_used(), 0);
    }
}
