//! Block chain with diff-layer light processing.
//!
//! A fully executing node turns every inserted block into a [`DiffLayer`]:
//! the exact set of account, storage and code changes the block produced.
//! A light-processing node that holds the diff for a block applies it
//! directly instead of executing the transactions, then checks the result
//! against the header's state root. A diff that does not reproduce the
//! header is discarded and the block is executed in full.

pub mod block;
pub mod blockchain;
pub mod builder;
pub mod diff_cache;
pub mod diff_layer;
pub mod encoding;
pub mod error;
pub mod executor;
pub mod fault;
pub mod genesis;
pub mod state;
pub mod stats;

pub use block::{Block, Header, Receipt, Transaction, TxAction};
pub use blockchain::{BlockChain, ChainConfig, DEFAULT_MAX_DIFF_LIMIT, DEFAULT_MAX_DIFF_SIZE};
pub use builder::{generate_chain, BlockGen};
pub use diff_cache::{CachedDiff, DiffCache, DiffSource, PutOutcome};
pub use diff_layer::{DiffAccount, DiffCode, DiffLayer, DiffStorage};
pub use error::{ChainError, DiffError, InsertError};
pub use fault::{DiffFault, DiffFaultReporter};
pub use genesis::Genesis;
pub use state::StateDb;
pub use stats::{ChainStats, ChainStatsSnapshot};
