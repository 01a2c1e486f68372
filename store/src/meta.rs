//! Metadata storage trait.

use crate::StoreError;

/// Meta key under which the canonical head block hash is stored.
pub const HEAD_BLOCK_KEY: &str = "head_block";

/// Trait for storing database metadata.
///
/// This is a generic key-value store for internal bookkeeping that doesn't
/// belong in any domain-specific store.
pub trait MetaStore {
    /// Retrieve a metadata value, `None` if unset.
    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}
