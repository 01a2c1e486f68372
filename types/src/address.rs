//! 20-byte account address.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// An account address, rendered as `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// An address with every byte set to `byte`.
    pub const fn repeat_byte(byte: u8) -> Self {
        Self([byte; 20])
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::decode_hex::<20>(s).map(Self)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_prefix() {
        let a: Address = "0x0101010101010101010101010101010101010101".parse().unwrap();
        let b: Address = "0101010101010101010101010101010101010101".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Address::repeat_byte(1));
    }

    #[test]
    fn rejects_bad_digit() {
        let err = "0x01010101010101010101010101010101010101zz"
            .parse::<Address>()
            .unwrap_err();
        assert_eq!(err, TypesError::InvalidHex('z'));
    }

    #[test]
    fn ordering_follows_bytes() {
        assert!(Address::repeat_byte(1) < Address::repeat_byte(2));
    }
}
