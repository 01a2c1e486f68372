use proptest::prelude::*;

use dsync_types::{Address, BlockHash, Hash256, Timestamp};

proptest! {
    /// Display output of a hash always parses back to the same hash.
    #[test]
    fn hash_display_parses_back(bytes in prop::array::uniform32(0u8..)) {
        let hash = Hash256::new(bytes);
        let parsed: Hash256 = hash.to_string().parse().unwrap();
        prop_assert_eq!(parsed, hash);
    }

    /// Block hashes parse from their display form too.
    #[test]
    fn block_hash_display_parses_back(bytes in prop::array::uniform32(0u8..)) {
        let hash = BlockHash::new(bytes);
        let parsed: BlockHash = hash.to_string().parse().unwrap();
        prop_assert_eq!(parsed, hash);
    }

    /// Address parsing accepts the display form.
    #[test]
    fn address_display_parses_back(bytes in prop::array::uniform20(0u8..)) {
        let addr = Address::new(bytes);
        let parsed: Address = addr.to_string().parse().unwrap();
        prop_assert_eq!(parsed, addr);
    }

    /// Hash256::is_zero is true only for all-zero bytes.
    #[test]
    fn hash_is_zero_correct(bytes in prop::array::uniform32(0u8..)) {
        let hash = Hash256::new(bytes);
        prop_assert_eq!(hash.is_zero(), bytes == [0u8; 32]);
    }

    /// Address ordering matches byte ordering, which canonical diff
    /// encoding relies on.
    #[test]
    fn address_ordering_matches_bytes(
        a in prop::array::uniform20(0u8..),
        b in prop::array::uniform20(0u8..),
    ) {
        prop_assert_eq!(Address::new(a).cmp(&Address::new(b)), a.cmp(&b));
    }

    /// Timestamp ordering: new(a) <= new(b) iff a <= b.
    #[test]
    fn timestamp_ordering(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
        let ta = Timestamp::new(a);
        let tb = Timestamp::new(b);
        prop_assert_eq!(ta <= tb, a <= b);
    }

    /// Bincode keeps a block hash as its raw 32 bytes.
    #[test]
    fn block_hash_bincode_is_raw_bytes(bytes in prop::array::uniform32(0u8..)) {
        let encoded = bincode::serialize(&BlockHash::new(bytes)).unwrap();
        prop_assert_eq!(encoded, bytes.to_vec());
    }
}
