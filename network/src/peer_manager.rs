//! Connection tracking, peer scoring and banning.

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Penalty / scoring types
// ---------------------------------------------------------------------------

/// Reasons a peer can be penalized. Each carries a fixed penalty value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PenaltyReason {
    /// Diff failed to decode or was not canonical.
    MalformedDiff,
    /// Response without a matching request.
    UnsolicitedResponse,
    /// Second, different diff for a block already cached.
    ConflictingDiff,
    /// Diff that did not reproduce the block, or answered the wrong request.
    BadDiff,
    /// Broke the packet state machine. Always bans.
    ProtocolViolation,
}

impl PenaltyReason {
    /// Penalty points deducted for this reason (always negative).
    pub fn penalty(self) -> i32 {
        match self {
            Self::MalformedDiff => -10,
            Self::UnsolicitedResponse => -25,
            Self::ConflictingDiff => -50,
            Self::BadDiff => -100,
            Self::ProtocolViolation => -200,
        }
    }
}

// ---------------------------------------------------------------------------
// Peer state
// ---------------------------------------------------------------------------

/// Per-peer metadata tracked by the [`PeerManager`].
#[derive(Clone, Debug)]
pub struct PeerRecord {
    /// Open connections from this peer.
    pub connections: usize,
    pub last_seen_secs: u64,
    /// Reputation score. Starts at 0, clamped to [`SCORE_MIN`]..=[`SCORE_MAX`].
    pub score: i32,
    pub banned: bool,
    /// Unix timestamp (seconds) when the ban expires, if any.
    pub ban_until_secs: Option<u64>,
}

impl PeerRecord {
    fn new() -> Self {
        Self {
            connections: 0,
            last_seen_secs: 0,
            score: 0,
            banned: false,
            ban_until_secs: None,
        }
    }

    /// Nothing worth remembering once the last connection closes.
    fn is_clean(&self) -> bool {
        !self.banned && self.score >= 0
    }
}

/// Score at or below which a peer is banned.
pub const BAN_THRESHOLD: i32 = -500;
/// Duration of a ban in seconds (1 hour).
pub const BAN_DURATION_SECS: u64 = 3600;
/// Minimum reputation score.
pub const SCORE_MIN: i32 = -1000;
/// Maximum reputation score.
pub const SCORE_MAX: i32 = 100;

// ---------------------------------------------------------------------------
// Peer manager
// ---------------------------------------------------------------------------

/// Reputation and connection bookkeeping keyed by peer id.
///
/// One id may hold several connections. A record outlives its connections
/// only while it carries a ban or a negative score, so a banned or
/// penalized peer keeps its standing when it reconnects.
pub struct PeerManager {
    peers: HashMap<String, PeerRecord>,
    /// Upper bound on simultaneously open connections.
    max_peers: usize,
    num_connected: usize,
}

impl PeerManager {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            max_peers,
            num_connected: 0,
        }
    }

    // -- Peer lifecycle --------------------------------------------------------

    /// Whether another connection from `peer_id` may be admitted right now.
    pub fn can_accept(&self, peer_id: &str) -> bool {
        !self.is_banned(peer_id) && self.num_connected < self.max_peers
    }

    /// Record a new connection. Returns `false` (and records nothing) when
    /// the peer is banned or the connection limit is reached.
    pub fn mark_connected(&mut self, peer_id: &str, now_secs: u64) -> bool {
        if !self.can_accept(peer_id) {
            return false;
        }
        let peer = self
            .peers
            .entry(peer_id.to_string())
            .or_insert_with(PeerRecord::new);
        peer.connections += 1;
        peer.last_seen_secs = now_secs;
        self.num_connected += 1;
        true
    }

    /// Update a peer's `last_seen_secs`. Called on every inbound packet.
    pub fn touch(&mut self, peer_id: &str, now_secs: u64) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.last_seen_secs = now_secs;
        }
    }

    /// Record that one connection closed. The record is dropped with the
    /// last connection unless it is banned or scored below zero.
    pub fn mark_disconnected(&mut self, peer_id: &str) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };
        if peer.connections > 0 {
            peer.connections -= 1;
            self.num_connected = self.num_connected.saturating_sub(1);
        }
        if peer.connections == 0 && peer.is_clean() {
            self.remove_peer(peer_id);
        }
    }

    /// Forget a peer entirely, including its score.
    pub fn remove_peer(&mut self, peer_id: &str) {
        if let Some(removed) = self.peers.remove(peer_id) {
            self.num_connected = self.num_connected.saturating_sub(removed.connections);
        }
    }

    // -- Queries ---------------------------------------------------------------

    /// Number of currently open connections, O(1).
    pub fn connected_count(&self) -> usize {
        self.num_connected
    }

    /// Number of peers with a record.
    pub fn known_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|p| p.connections > 0 && !p.banned)
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    pub fn score(&self, peer_id: &str) -> i32 {
        self.peers.get(peer_id).map_or(0, |p| p.score)
    }

    // -- Scoring / banning -----------------------------------------------------

    /// Penalize a peer for bad behaviour. Returns `true` if the peer was
    /// banned as a result.
    pub fn penalize(&mut self, peer_id: &str, reason: PenaltyReason, now_secs: u64) -> bool {
        let peer = self
            .peers
            .entry(peer_id.to_string())
            .or_insert_with(PeerRecord::new);
        if peer.banned {
            return false;
        }

        let should_ban = if reason == PenaltyReason::ProtocolViolation {
            true
        } else {
            peer.score = (peer.score + reason.penalty()).max(SCORE_MIN);
            peer.score <= BAN_THRESHOLD
        };

        if should_ban {
            self.num_connected = self.num_connected.saturating_sub(peer.connections);
            Self::ban_peer(peer, now_secs);
            tracing::warn!(peer = peer_id, reason = ?reason, "peer banned");
            return true;
        }

        tracing::debug!(peer = peer_id, reason = ?reason, score = peer.score, "peer penalized");
        false
    }

    /// Reward a peer for good behaviour (e.g. delivering a valid diff).
    pub fn reward(&mut self, peer_id: &str, amount: i32) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.score = (peer.score + amount).min(SCORE_MAX);
        }
    }

    /// Check whether a peer is currently banned.
    pub fn is_banned(&self, peer_id: &str) -> bool {
        self.peers.get(peer_id).is_some_and(|p| p.banned)
    }

    /// Unban peers whose ban has expired. Expired records with no open
    /// connection are dropped.
    pub fn check_bans(&mut self, now_secs: u64) {
        self.peers.retain(|_, peer| {
            if peer.banned && peer.ban_until_secs.is_some_and(|until| now_secs >= until) {
                peer.banned = false;
                peer.ban_until_secs = None;
                peer.score = 0;
                return peer.connections > 0;
            }
            true
        });
    }

    /// Banned connections no longer count against the limit; the caller is
    /// expected to close them.
    fn ban_peer(peer: &mut PeerRecord, now_secs: u64) {
        peer.banned = true;
        peer.connections = 0;
        peer.ban_until_secs = Some(now_secs + BAN_DURATION_SECS);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_and_disconnect() {
        let mut pm = PeerManager::new(10);
        assert!(pm.mark_connected("a", 100));
        assert_eq!(pm.connected_count(), 1);
        assert!(pm.is_connected("a"));

        pm.mark_disconnected("a");
        assert_eq!(pm.connected_count(), 0);
        assert!(!pm.is_connected("a"));
    }

    #[test]
    fn connections_from_one_peer_are_counted() {
        let mut pm = PeerManager::new(10);
        pm.mark_connected("a", 1);
        pm.mark_connected("a", 2);
        assert_eq!(pm.connected_count(), 2);
        assert_eq!(pm.get("a").unwrap().connections, 2);
        assert_eq!(pm.get("a").unwrap().last_seen_secs, 2);

        pm.mark_disconnected("a");
        assert!(pm.is_connected("a"));
        pm.mark_disconnected("a");
        assert!(!pm.is_connected("a"));
        assert_eq!(pm.connected_count(), 0);
    }

    #[test]
    fn connection_limit_is_enforced() {
        let mut pm = PeerManager::new(2);
        assert!(pm.mark_connected("a", 0));
        assert!(pm.mark_connected("b", 0));
        assert!(!pm.mark_connected("c", 0));
        assert!(!pm.can_accept("a"));

        pm.mark_disconnected("a");
        assert!(pm.mark_connected("c", 0));
    }

    #[test]
    fn clean_records_are_dropped_on_last_disconnect() {
        let mut pm = PeerManager::new(10);
        for i in 0..100 {
            let id = format!("peer-{i}");
            pm.mark_connected(&id, 0);
            pm.reward(&id, 5);
            pm.mark_disconnected(&id);
        }
        assert_eq!(pm.known_count(), 0);
        assert_eq!(pm.connected_count(), 0);
    }

    #[test]
    fn penalized_records_survive_disconnect() {
        let mut pm = PeerManager::new(10);
        pm.mark_connected("a", 0);
        pm.penalize("a", PenaltyReason::ConflictingDiff, 0);
        pm.mark_disconnected("a");

        assert_eq!(pm.known_count(), 1);
        assert!(pm.mark_connected("a", 1));
        assert_eq!(pm.score("a"), -50);
    }

    #[test]
    fn scoring_and_ban_threshold() {
        let mut pm = PeerManager::new(10);
        pm.mark_connected("a", 0);

        // 5 * -100 = -500 -> hits threshold
        for _ in 0..4 {
            assert!(!pm.penalize("a", PenaltyReason::BadDiff, 0));
        }
        assert!(pm.penalize("a", PenaltyReason::BadDiff, 0));
        assert!(pm.is_banned("a"));
        assert_eq!(pm.connected_count(), 0);
        assert!(!pm.can_accept("a"));
    }

    #[test]
    fn ban_releases_every_connection_once() {
        let mut pm = PeerManager::new(10);
        pm.mark_connected("a", 0);
        pm.mark_connected("a", 0);
        pm.mark_connected("b", 0);
        assert!(pm.penalize("a", PenaltyReason::ProtocolViolation, 0));
        assert_eq!(pm.connected_count(), 1);

        // The closing connections report in afterwards.
        pm.mark_disconnected("a");
        pm.mark_disconnected("a");
        assert_eq!(pm.connected_count(), 1);
        assert!(pm.is_banned("a"));
    }

    #[test]
    fn malformed_diffs_are_a_light_penalty() {
        let mut pm = PeerManager::new(10);
        pm.mark_connected("a", 0);
        assert!(!pm.penalize("a", PenaltyReason::MalformedDiff, 0));
        assert_eq!(pm.score("a"), -10);
        assert!(pm.is_connected("a"));
    }

    #[test]
    fn protocol_violation_bans_immediately() {
        let mut pm = PeerManager::new(10);
        pm.mark_connected("a", 0);
        assert!(pm.penalize("a", PenaltyReason::ProtocolViolation, 100));
        assert!(pm.is_banned("a"));
        assert_eq!(pm.get("a").unwrap().ban_until_secs, Some(100 + 3600));
    }

    #[test]
    fn penalizing_banned_peer_is_a_noop() {
        let mut pm = PeerManager::new(10);
        assert!(pm.penalize("a", PenaltyReason::ProtocolViolation, 0));
        assert!(!pm.penalize("a", PenaltyReason::ProtocolViolation, 0));
    }

    #[test]
    fn reward_clamps_to_max() {
        let mut pm = PeerManager::new(10);
        pm.mark_connected("a", 0);
        pm.reward("a", 200);
        assert_eq!(pm.score("a"), SCORE_MAX);
    }

    #[test]
    fn check_bans_unbans_expired() {
        let mut pm = PeerManager::new(10);
        pm.penalize("a", PenaltyReason::ProtocolViolation, 1000);
        assert!(pm.is_banned("a"));

        pm.check_bans(1000 + 3599);
        assert!(pm.is_banned("a"));

        pm.check_bans(1000 + 3600);
        assert!(!pm.is_banned("a"));
        assert_eq!(pm.score("a"), 0);
        assert_eq!(pm.known_count(), 0);
    }

    #[test]
    fn remove_peer_forgets_score() {
        let mut pm = PeerManager::new(10);
        pm.mark_connected("a", 0);
        pm.penalize("a", PenaltyReason::ConflictingDiff, 0);
        pm.remove_peer("a");
        assert_eq!(pm.connected_count(), 0);
        assert_eq!(pm.score("a"), 0);
    }
}
