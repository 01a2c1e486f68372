//! Canonical bincode encoding shared by blocks, receipts and diff layers.
//!
//! Fixed-width integers and rejection of trailing bytes make the encoding a
//! bijection on the values we accept, so hashing the bytes is equivalent to
//! hashing the value.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .serialize(value)
}

/// Decode `bytes`, refusing to allocate more than `limit` bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], limit: u64) -> Result<T, bincode::Error> {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(limit)
        .deserialize(bytes)
}
