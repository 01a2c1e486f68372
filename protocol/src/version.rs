//! Protocol version management.

/// Capability name advertised for the sub-protocol.
pub const PROTOCOL_NAME: &str = "diff";

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Minimum supported protocol version.
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Check if a peer's protocol version is compatible.
pub fn is_compatible(peer_version: u32) -> bool {
    (MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&peer_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_version_is_compatible() {
        assert!(is_compatible(PROTOCOL_VERSION));
        assert!(is_compatible(MIN_PROTOCOL_VERSION));
    }

    #[test]
    fn out_of_range_versions_are_not() {
        assert!(!is_compatible(0));
        assert!(!is_compatible(PROTOCOL_VERSION + 1));
    }
}
