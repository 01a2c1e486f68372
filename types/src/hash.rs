//! General-purpose 32-byte hash used for state roots, storage slots and
//! diff content hashes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// A 32-byte keccak-256 digest or storage word.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// A hash with every byte set to `byte`. Handy for fixtures.
    pub const fn repeat_byte(byte: u8) -> Self {
        Self([byte; 32])
    }

    /// A storage word holding `value` big-endian in the low 8 bytes.
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Hash256 {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::decode_hex::<32>(s).map(Self)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_u64_is_big_endian_in_tail() {
        let h = Hash256::from_low_u64(0x0102);
        assert_eq!(h.as_bytes()[30], 0x01);
        assert_eq!(h.as_bytes()[31], 0x02);
        assert!(h.as_bytes()[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn parses_display_output() {
        let h = Hash256::repeat_byte(0xab);
        let parsed: Hash256 = h.to_string().parse().unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn rejects_short_input() {
        let err = "0xabcd".parse::<Hash256>().unwrap_err();
        assert_eq!(
            err,
            TypesError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }
}
