//! Peer set: active diff peers and their outstanding requests.
//!
//! Shared between the connection tasks (which register and unregister
//! peers) and the handler's outbound paths (requests, broadcasts).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dsync_network::DiffPeer;
use dsync_types::BlockHash;
use tokio::sync::RwLock;

/// One registered peer and the `GetDiffLayer` requests it has not answered.
pub struct PeerEntry {
    peer: Arc<DiffPeer>,
    pending: Mutex<HashMap<u64, BlockHash>>,
}

impl PeerEntry {
    fn new(peer: Arc<DiffPeer>) -> Self {
        Self {
            peer,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn peer(&self) -> &Arc<DiffPeer> {
        &self.peer
    }

    pub fn add_pending(&self, request_id: u64, block: BlockHash) {
        self.lock_pending().insert(request_id, block);
    }

    /// Remove and return the block a request asked for.
    pub fn take_pending(&self, request_id: u64) -> Option<BlockHash> {
        self.lock_pending().remove(&request_id)
    }

    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, BlockHash>> {
        self.pending.lock().expect("pending lock poisoned")
    }
}

/// Active peers keyed by id.
#[derive(Default)]
pub struct PeerSet {
    peers: RwLock<HashMap<String, Arc<PeerEntry>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. Returns `false` if one with the same id is already
    /// registered; the existing entry is kept.
    pub async fn register(&self, peer: Arc<DiffPeer>) -> bool {
        let mut peers = self.peers.write().await;
        if peers.contains_key(peer.id()) {
            return false;
        }
        peers.insert(peer.id().to_string(), Arc::new(PeerEntry::new(peer)));
        true
    }

    /// Remove a peer, dropping its outstanding requests with it.
    pub async fn unregister(&self, peer_id: &str) -> Option<Arc<PeerEntry>> {
        self.peers.write().await.remove(peer_id)
    }

    pub async fn get(&self, peer_id: &str) -> Option<Arc<PeerEntry>> {
        self.peers.read().await.get(peer_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Active peers that asked to be sent diff layers.
    pub async fn light_sync_peers(&self) -> Vec<Arc<DiffPeer>> {
        self.peers
            .read()
            .await
            .values()
            .filter(|entry| entry.peer.is_active() && entry.peer.light_sync())
            .map(|entry| Arc::clone(&entry.peer))
            .collect()
    }

    /// Unregister everyone, returning the removed peers.
    pub async fn drain(&self) -> Vec<Arc<DiffPeer>> {
        self.peers
            .write()
            .await
            .drain()
            .map(|(_, entry)| Arc::clone(&entry.peer))
            .collect()
    }
}
