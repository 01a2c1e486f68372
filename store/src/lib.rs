//! Abstract storage traits for the dsync node.
//!
//! Every storage backend (in-memory for testing, an embedded database in
//! production) implements these traits. The chain depends only on the traits.
//!
//! Reads go through the per-concern traits; every mutation goes through a
//! [`WriteBatch`] so that a block's state, body and head pointer land
//! atomically or not at all.

pub mod account;
pub mod batch;
pub mod block;
pub mod code;
pub mod error;
pub mod meta;
pub mod storage;

pub use account::{Account, AccountStore};
pub use batch::{BatchOp, BatchWriter, WriteBatch};
pub use block::BlockStore;
pub use code::CodeStore;
pub use error::StoreError;
pub use meta::{MetaStore, HEAD_BLOCK_KEY};
pub use storage::StorageStore;

/// Everything the chain needs from a backend.
pub trait ChainStore:
    AccountStore + StorageStore + CodeStore + BlockStore + MetaStore + BatchWriter + Send + Sync
{
}

impl<T> ChainStore for T where
    T: AccountStore + StorageStore + CodeStore + BlockStore + MetaStore + BatchWriter + Send + Sync
{
}
