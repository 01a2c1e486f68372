use proptest::prelude::*;

use dsync_chain::{DiffCache, DiffLayer, DiffSource, PutOutcome};
use dsync_crypto::keccak256;
use dsync_types::{BlockHash, Hash256};

fn layer(number: u64) -> (DiffLayer, Vec<u8>) {
    let layer = DiffLayer {
        block_hash: BlockHash::new([number as u8; 32]),
        number,
        receipts: Vec::new(),
        codes: Vec::new(),
        destructs: Vec::new(),
        accounts: Vec::new(),
        storage: Vec::new(),
        diff_hash: Hash256::ZERO,
    };
    let raw = layer.encode().unwrap();
    (layer, raw)
}

proptest! {
    /// The cache never exceeds its capacity and always evicts the oldest
    /// distinct key.
    #[test]
    fn bounded_fifo(capacity in 0usize..8, keys in prop::collection::vec(0u8..16, 0..64)) {
        let cache = DiffCache::new(capacity);
        let mut model: std::collections::VecDeque<u8> = Default::default();

        for key in keys {
            let hash = BlockHash::new([key; 32]);
            let (l, raw) = layer(key as u64);
            let outcome = cache.put(hash, l, raw, DiffSource::Local).unwrap();

            if capacity == 0 {
                prop_assert_eq!(outcome, PutOutcome::Discarded);
            } else if model.contains(&key) {
                prop_assert_eq!(outcome, PutOutcome::Duplicate);
            } else {
                let expected = if model.len() == capacity { model.pop_front() } else { None };
                model.push_back(key);
                prop_assert_eq!(
                    outcome,
                    PutOutcome::Inserted { evicted: expected.map(|k| BlockHash::new([k; 32])) }
                );
            }
            prop_assert!(cache.len() <= capacity);
            prop_assert_eq!(cache.len(), model.len());
        }
    }

    /// The stored content hash is always recomputed from the raw bytes.
    #[test]
    fn content_hash_ignores_embedded_value(embedded in any::<[u8; 32]>(), number in any::<u64>()) {
        let cache = DiffCache::new(4);
        let (mut l, raw) = layer(number);
        l.diff_hash = Hash256::new(embedded);
        let hash = l.block_hash;
        cache.put(hash, l, raw.clone(), DiffSource::Peer("p".into())).unwrap();
        let entry = cache.get(&hash).unwrap();
        prop_assert_eq!(entry.diff_hash, keccak256(&raw));
        prop_assert_eq!(entry.layer.diff_hash, keccak256(&raw));
    }
}
