//! Bounded FIFO cache of diff layers keyed by block hash.
//!
//! When full, the entry that arrived first is evicted to make room. Entries
//! are never refreshed: a duplicate put leaves arrival order unchanged, and a
//! different payload for a cached block is refused so the first one wins.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use dsync_crypto::keccak256;
use dsync_types::{BlockHash, Hash256};

use crate::diff_layer::DiffLayer;
use crate::error::DiffError;

/// Where a cached diff came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DiffSource {
    /// Produced by executing the block on this node.
    Local,
    /// Received from the peer with this id.
    Peer(String),
}

impl DiffSource {
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            Self::Local => None,
            Self::Peer(id) => Some(id),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CachedDiff {
    pub layer: Arc<DiffLayer>,
    /// Exact bytes the content hash was computed over.
    pub raw: Arc<Vec<u8>>,
    pub diff_hash: Hash256,
    pub source: DiffSource,
    /// Arrival sequence number, strictly increasing per cache.
    pub seq: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// Stored. `evicted` names the block whose diff made room, if any.
    Inserted { evicted: Option<BlockHash> },
    /// Identical content was already cached for this block.
    Duplicate,
    /// The cache has zero capacity and stores nothing.
    Discarded,
}

struct Inner {
    entries: HashMap<BlockHash, CachedDiff>,
    order: VecDeque<BlockHash>,
    next_seq: u64,
}

pub struct DiffCache {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl DiffCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                next_seq: 0,
            }),
            capacity,
        }
    }

    /// Store `layer` with the bytes it was decoded from.
    ///
    /// The content hash is recomputed over `raw`; whatever `layer.diff_hash`
    /// held on entry is overwritten.
    pub fn put(
        &self,
        hash: BlockHash,
        mut layer: DiffLayer,
        raw: Vec<u8>,
        source: DiffSource,
    ) -> Result<PutOutcome, DiffError> {
        let diff_hash = keccak256(&raw);
        layer.diff_hash = diff_hash;

        let mut inner = self.inner.write().expect("diff cache lock poisoned");
        if let Some(existing) = inner.entries.get(&hash) {
            if existing.diff_hash == diff_hash {
                return Ok(PutOutcome::Duplicate);
            }
            return Err(DiffError::ConflictingDiff {
                block: hash,
                cached: existing.diff_hash,
                received: diff_hash,
            });
        }
        if self.capacity == 0 {
            return Ok(PutOutcome::Discarded);
        }

        let mut evicted = None;
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.push_back(hash);
        inner.entries.insert(
            hash,
            CachedDiff {
                layer: Arc::new(layer),
                raw: Arc::new(raw),
                diff_hash,
                source,
                seq,
            },
        );
        Ok(PutOutcome::Inserted { evicted })
    }

    pub fn get(&self, hash: &BlockHash) -> Option<CachedDiff> {
        self.read().entries.get(hash).cloned()
    }

    /// The exact bytes cached for `hash`, for serving to peers.
    pub fn get_raw(&self, hash: &BlockHash) -> Option<Vec<u8>> {
        self.read().entries.get(hash).map(|e| e.raw.as_ref().clone())
    }

    pub fn get_layer(&self, hash: &BlockHash) -> Option<Arc<DiffLayer>> {
        self.read().entries.get(hash).map(|e| Arc::clone(&e.layer))
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.read().entries.contains_key(hash)
    }

    /// Drop the diff for `hash`, returning it if present.
    pub fn remove(&self, hash: &BlockHash) -> Option<CachedDiff> {
        let mut inner = self.inner.write().expect("diff cache lock poisoned");
        let removed = inner.entries.remove(hash)?;
        inner.order.retain(|h| h != hash);
        Some(removed)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("diff cache lock poisoned");
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cached block hashes, oldest first.
    pub fn hashes(&self) -> Vec<BlockHash> {
        self.read().order.iter().copied().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("diff cache lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hash(byte: u8) -> BlockHash {
        BlockHash::new([byte; 32])
    }

    fn layer(byte: u8, number: u64) -> (DiffLayer, Vec<u8>) {
        let layer = DiffLayer {
            block_hash: make_hash(byte),
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

    fn put(cache: &DiffCache, byte: u8) -> PutOutcome {
        let (l, raw) = layer(byte, byte as u64);
        cache.put(make_hash(byte), l, raw, DiffSource::Local).unwrap()
    }

    #[test]
    fn put_and_get() {
        let cache = DiffCache::new(4);
        let (l, raw) = layer(1, 1);
        cache
            .put(make_hash(1), l, raw.clone(), DiffSource::Peer("p1".into()))
            .unwrap();

        assert!(cache.contains(&make_hash(1)));
        assert_eq!(cache.get_raw(&make_hash(1)).unwrap(), raw);
        let entry = cache.get(&make_hash(1)).unwrap();
        assert_eq!(entry.diff_hash, keccak256(&raw));
        assert_eq!(entry.layer.diff_hash, entry.diff_hash);
        assert_eq!(entry.source.peer_id(), Some("p1"));
    }

    #[test]
    fn embedded_hash_is_overwritten() {
        let cache = DiffCache::new(4);
        let (mut l, raw) = layer(1, 1);
        l.diff_hash = Hash256::repeat_byte(0xab);
        cache.put(make_hash(1), l, raw.clone(), DiffSource::Local).unwrap();
        assert_eq!(cache.get_layer(&make_hash(1)).unwrap().diff_hash, keccak256(&raw));
    }

    #[test]
    fn eviction_is_fifo() {
        let cache = DiffCache::new(2);
        put(&cache, 1);
        put(&cache, 2);
        assert_eq!(
            put(&cache, 3),
            PutOutcome::Inserted {
                evicted: Some(make_hash(1))
            }
        );
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&make_hash(1)));
        assert_eq!(cache.hashes(), vec![make_hash(2), make_hash(3)]);
    }

    #[test]
    fn duplicate_does_not_refresh_order() {
        let cache = DiffCache::new(2);
        put(&cache, 1);
        put(&cache, 2);
        assert_eq!(put(&cache, 1), PutOutcome::Duplicate);
        put(&cache, 3);
        assert!(!cache.contains(&make_hash(1)));
        assert!(cache.contains(&make_hash(2)));
    }

    #[test]
    fn conflicting_payload_keeps_first() {
        let cache = DiffCache::new(4);
        let (first, first_raw) = layer(1, 1);
        cache
            .put(make_hash(1), first, first_raw.clone(), DiffSource::Peer("a".into()))
            .unwrap();

        let (second, second_raw) = layer(1, 99);
        let err = cache
            .put(make_hash(1), second, second_raw, DiffSource::Peer("b".into()))
            .unwrap_err();
        assert!(matches!(err, DiffError::ConflictingDiff { .. }));
        assert_eq!(cache.get_raw(&make_hash(1)).unwrap(), first_raw);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = DiffCache::new(0);
        assert_eq!(put(&cache, 1), PutOutcome::Discarded);
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 0);
    }

    #[test]
    fn remove_frees_a_slot() {
        let cache = DiffCache::new(2);
        put(&cache, 1);
        put(&cache, 2);
        assert!(cache.remove(&make_hash(1)).is_some());
        assert!(cache.remove(&make_hash(1)).is_none());
        assert_eq!(put(&cache, 3), PutOutcome::Inserted { evicted: None });
        assert_eq!(cache.hashes(), vec![make_hash(2), make_hash(3)]);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = DiffCache::new(3);
        put(&cache, 1);
        put(&cache, 2);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&make_hash(2)).is_none());
    }

    #[test]
    fn sequence_numbers_increase() {
        let cache = DiffCache::new(3);
        put(&cache, 1);
        put(&cache, 2);
        let a = cache.get(&make_hash(1)).unwrap().seq;
        let b = cache.get(&make_hash(2)).unwrap().seq;
        assert!(a < b);
    }
}
