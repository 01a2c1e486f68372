//! Fundamental types for the dsync node.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! addresses, hashes, timestamps and chain parameters.

pub mod address;
pub mod block;
pub mod error;
pub mod hash;
pub mod params;
pub mod time;

pub use address::Address;
pub use block::BlockHash;
pub use error::TypesError;
pub use hash::Hash256;
pub use params::ChainParams;
pub use time::Timestamp;

/// Decode hex (optional `0x` prefix) into exactly `N` bytes.
pub(crate) fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N], TypesError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, .. } => TypesError::InvalidHex(c),
        _ => TypesError::InvalidLength {
            expected: N,
            actual: digits.len() / 2,
        },
    })?;
    Ok(out)
}
