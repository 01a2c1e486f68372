//! Cryptographic primitives for the dsync node.
//!
//! Everything content-addressed in the node (block headers, diff layers,
//! state roots, contract code) is hashed with Keccak-256.

pub mod hash;

pub use hash::{hash_block, keccak256, keccak256_multi, EMPTY_HASH};
