//! Atomic write batches.

use crate::{Account, StoreError};
use dsync_types::{Address, BlockHash, Hash256};

/// A single mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    PutAccount { address: Address, account: Account },
    DeleteAccount { address: Address },
    /// A zero `value` deletes the slot.
    PutStorage { address: Address, key: Hash256, value: Hash256 },
    /// Drop every slot of an account (self-destruct).
    ClearStorage { address: Address },
    PutCode { code_hash: Hash256, code: Vec<u8> },
    PutBlock { hash: BlockHash, bytes: Vec<u8> },
    PutCanonical { number: u64, hash: BlockHash },
    PutMeta { key: String, value: Vec<u8> },
}

/// Ordered list of mutations applied all-or-nothing.
///
/// Operations are applied in insertion order, so a `ClearStorage` followed
/// by `PutStorage` for the same account leaves only the new slots.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: BatchOp) {
        self.ops.push(op);
    }

    pub fn put_account(&mut self, address: Address, account: Account) {
        self.push(BatchOp::PutAccount { address, account });
    }

    pub fn delete_account(&mut self, address: Address) {
        self.push(BatchOp::DeleteAccount { address });
    }

    pub fn put_storage(&mut self, address: Address, key: Hash256, value: Hash256) {
        self.push(BatchOp::PutStorage {
            address,
            key,
            value,
        });
    }

    pub fn clear_storage(&mut self, address: Address) {
        self.push(BatchOp::ClearStorage { address });
    }

    pub fn put_code(&mut self, code_hash: Hash256, code: Vec<u8>) {
        self.push(BatchOp::PutCode { code_hash, code });
    }

    pub fn put_block(&mut self, hash: BlockHash, bytes: Vec<u8>) {
        self.push(BatchOp::PutBlock { hash, bytes });
    }

    pub fn put_canonical(&mut self, number: u64, hash: BlockHash) {
        self.push(BatchOp::PutCanonical { number, hash });
    }

    pub fn put_meta(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.push(BatchOp::PutMeta {
            key: key.into(),
            value,
        });
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Backends commit batches atomically.
pub trait BatchWriter {
    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError>;
}
