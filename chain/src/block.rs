//! Headers, blocks, transactions and receipts.

use dsync_crypto::{hash_block, keccak256};
use dsync_types::{Address, BlockHash, Hash256, Timestamp};
use serde::{Deserialize, Serialize};

use crate::encoding;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: BlockHash,
    pub number: u64,
    pub timestamp: Timestamp,
    /// Receives transaction fees and the block reward.
    pub coinbase: Address,
    /// Commitment to the full account state after this block.
    pub state_root: Hash256,
    pub transactions_root: Hash256,
    pub receipts_root: Hash256,
    pub gas_used: u64,
}

impl Header {
    /// Keccak-256 of the canonical header encoding.
    pub fn hash(&self) -> BlockHash {
        match encoding::encode(self) {
            Ok(bytes) => hash_block(&bytes),
            // Fixed-size struct; serialization into a Vec cannot fail.
            Err(_) => BlockHash::ZERO,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> BlockHash {
        self.header.parent_hash
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxAction {
    /// Move `value` from the sender to `to`, creating `to` if needed.
    Transfer { to: Address, value: u128 },
    /// Write one slot of the sender's storage. A zero value clears it.
    Store { key: Hash256, value: Hash256 },
    /// Attach `code` to the sender.
    Deploy { code: Vec<u8> },
    /// Send the remaining balance to `beneficiary` and delete the sender.
    Destruct { beneficiary: Address },
}

impl TxAction {
    pub fn value(&self) -> u128 {
        match self {
            Self::Transfer { value, .. } => *value,
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub nonce: u64,
    pub gas_price: u128,
    pub action: TxAction,
}

impl Transaction {
    pub fn hash(&self) -> Hash256 {
        match encoding::encode(self) {
            Ok(bytes) => keccak256(&bytes),
            Err(_) => Hash256::ZERO,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash256,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
}

/// Commitment to an ordered transaction list.
pub fn transactions_root(txs: &[Transaction]) -> Result<Hash256, bincode::Error> {
    Ok(keccak256(&encoding::encode(&txs)?))
}

/// Commitment to an ordered receipt list.
pub fn receipts_root(receipts: &[Receipt]) -> Result<Hash256, bincode::Error> {
    Ok(keccak256(&encoding::encode(&receipts)?))
}
