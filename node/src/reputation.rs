//! Peer scoring fed by diff faults and protocol violations.
//!
//! Connections are identified by their transport's remote id. For TCP that
//! is `ip:port`, and the port changes on every reconnect, so scores and bans
//! are kept per host: an id that parses as a socket address is scored under
//! its IP, any other id under itself.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use dsync_chain::{DiffFault, DiffFaultReporter};
use dsync_network::{PeerManager, PeerRecord, PenaltyReason};
use dsync_types::BlockHash;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Score bonus for a diff layer that was accepted into the cache.
pub const ACCEPTED_DIFF_REWARD: i32 = 1;

/// Shared [`PeerManager`] plus a channel announcing banned hosts so the node
/// can drop their connections.
pub struct PeerReputation {
    manager: Mutex<PeerManager>,
    bans: mpsc::UnboundedSender<String>,
}

impl PeerReputation {
    /// Returns the reputation tracker and the receiving end of its ban
    /// announcements.
    pub fn new(max_peers: usize) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (bans, rx) = mpsc::unbounded_channel();
        let reputation = Self {
            manager: Mutex::new(PeerManager::new(max_peers)),
            bans,
        };
        (reputation, rx)
    }

    /// Record a connection. `false` when the peer is banned or the
    /// connection limit is reached.
    pub fn admit(&self, peer_id: &str) -> bool {
        self.lock().mark_connected(&host_key(peer_id), unix_now_secs())
    }

    pub fn disconnected(&self, peer_id: &str) {
        self.lock().mark_disconnected(&host_key(peer_id));
    }

    pub fn touch(&self, peer_id: &str) {
        self.lock().touch(&host_key(peer_id), unix_now_secs());
    }

    pub fn reward(&self, peer_id: &str, amount: i32) {
        self.lock().reward(&host_key(peer_id), amount);
    }

    /// Penalize `peer_id`. Returns `true` if this banned its host, in which
    /// case the host key is announced on the ban channel.
    pub fn penalize(&self, peer_id: &str, reason: PenaltyReason) -> bool {
        let key = host_key(peer_id);
        let banned = self.lock().penalize(&key, reason, unix_now_secs());
        if banned {
            // Nobody listening just means nobody to disconnect.
            let _ = self.bans.send(key.into_owned());
        }
        banned
    }

    pub fn is_banned(&self, peer_id: &str) -> bool {
        self.lock().is_banned(&host_key(peer_id))
    }

    pub fn score(&self, peer_id: &str) -> i32 {
        self.lock().score(&host_key(peer_id))
    }

    pub fn record(&self, peer_id: &str) -> Option<PeerRecord> {
        self.lock().get(&host_key(peer_id)).cloned()
    }

    pub fn connected_count(&self) -> usize {
        self.lock().connected_count()
    }

    /// Hosts with a record: connected, banned or penalized.
    pub fn known_count(&self) -> usize {
        self.lock().known_count()
    }

    /// Lift bans that have run out.
    pub fn expire_bans(&self) {
        self.lock().check_bans(unix_now_secs());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PeerManager> {
        self.manager.lock().expect("peer manager lock poisoned")
    }
}

/// Key a connection id is scored under: the IP of a socket address, the id
/// itself otherwise.
pub fn host_key(peer_id: &str) -> Cow<'_, str> {
    match peer_id.parse::<SocketAddr>() {
        Ok(addr) => Cow::Owned(addr.ip().to_string()),
        Err(_) => Cow::Borrowed(peer_id),
    }
}

/// Penalty for each diff fault.
pub fn penalty_for(fault: DiffFault) -> PenaltyReason {
    match fault {
        DiffFault::Malformed => PenaltyReason::MalformedDiff,
        DiffFault::Unsolicited => PenaltyReason::UnsolicitedResponse,
        DiffFault::Conflicting => PenaltyReason::ConflictingDiff,
        DiffFault::StateMismatch | DiffFault::HashMismatch => PenaltyReason::BadDiff,
    }
}

impl DiffFaultReporter for PeerReputation {
    fn report(&self, peer_id: &str, block: BlockHash, fault: DiffFault) {
        if self.penalize(peer_id, penalty_for(fault)) {
            warn!(peer = peer_id, block = %block.short(), %fault, "peer banned for diff fault");
        } else {
            info!(peer = peer_id, block = %block.short(), %fault, "diff fault reported");
        }
    }
}

/// Current UNIX timestamp in seconds.
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
