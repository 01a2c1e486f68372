use dsync_types::{BlockHash, Hash256, Timestamp};
use thiserror::Error;

/// Why a block could not be inserted.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unknown parent {parent} for block {hash}")]
    UnknownParent { hash: BlockHash, parent: BlockHash },

    #[error("block {hash} at height {number} does not extend the canonical head")]
    SideChain { hash: BlockHash, number: u64 },

    #[error("invalid block number: expected {expected}, got {got}")]
    InvalidNumber { expected: u64, got: u64 },

    #[error("timestamp {got} is older than parent timestamp {parent}")]
    InvalidTimestamp { parent: Timestamp, got: Timestamp },

    #[error("transactions root mismatch: header {expected}, computed {computed}")]
    TransactionsRootMismatch { expected: Hash256, computed: Hash256 },

    #[error("gas used {used} exceeds block gas limit {limit}")]
    GasLimitExceeded { used: u64, limit: u64 },

    #[error("invalid transaction #{index}: {reason}")]
    InvalidTransaction { index: usize, reason: String },

    #[error("state root mismatch: header {expected}, computed {computed}")]
    StateRootMismatch { expected: Hash256, computed: Hash256 },

    #[error("receipts root mismatch: header {expected}, computed {computed}")]
    ReceiptsRootMismatch { expected: Hash256, computed: Hash256 },

    #[error("gas used mismatch: header {expected}, computed {computed}")]
    GasUsedMismatch { expected: u64, computed: u64 },

    #[error("corrupt chain data: {0}")]
    Corrupt(String),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("storage error: {0}")]
    Store(#[from] dsync_store::StoreError),
}

/// A diff layer was rejected. Never fatal: the block can always be executed.
#[derive(Debug, Error)]
pub enum DiffError {
    #[error("malformed diff layer: {0}")]
    Malformed(String),

    #[error("diff layer too large: {size} > {max}")]
    TooLarge { size: usize, max: usize },

    #[error("diff layer is not in canonical form: {0}")]
    NonCanonical(&'static str),

    #[error("conflicting diff for block {block}: cached {cached}, received {received}")]
    ConflictingDiff {
        block: BlockHash,
        cached: Hash256,
        received: Hash256,
    },

    #[error("diff for block {got} returned for request of {expected}")]
    HashMismatch { expected: BlockHash, got: BlockHash },

    #[error("diff state root mismatch: header {expected}, computed {computed}")]
    StateRootMismatch { expected: Hash256, computed: Hash256 },

    #[error("diff receipts mismatch: {0}")]
    ReceiptsMismatch(String),

    #[error("diff writes state outside the state root: {0}")]
    Unanchored(String),
}

/// Failure part-way through `insert_chain`: `inserted` blocks were committed
/// before `source` stopped the batch.
#[derive(Debug, Error)]
#[error("insertion stopped after {inserted} blocks: {source}")]
pub struct InsertError {
    pub inserted: usize,
    #[source]
    pub source: ChainError,
}
