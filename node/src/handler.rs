//! The `diff` sub-protocol handler.
//!
//! [`DiffHandler::run_peer`] owns one connection from handshake to
//! disconnect. Every packet read in between goes through
//! [`DiffHandler::handle`], which dispatches on the closed [`DiffPacket`]
//! set:
//!
//! | packet              | action                                              |
//! |---------------------|-----------------------------------------------------|
//! | `Status`            | protocol violation, disconnect                      |
//! | `DiffLayers`        | each raw diff goes to the chain's diff intake       |
//! | `GetDiffLayer`      | answer from the diff cache, `None` on a miss        |
//! | `DiffLayerResponse` | match against a pending request, then diff intake   |
//!
//! Bad diffs never cost the connection; the chain reports them and the
//! peer's score takes the hit. Broken envelopes do.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dsync_chain::{BlockChain, DiffFault, DiffFaultReporter};
use dsync_messages::{
    DiffLayerResponsePacket, DiffLayersPacket, DiffPacket, GetDiffLayerPacket,
};
use dsync_network::{DiffPeer, MsgReadWriter, NetworkError, PeerState, PenaltyReason};
use dsync_types::BlockHash;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use crate::metrics::DiffSyncMetrics;
use crate::peer_set::PeerSet;
use crate::reputation::{PeerReputation, ACCEPTED_DIFF_REWARD};
use crate::tracing_spans::{diff_broadcast_span, packet_recv_span};
use crate::NodeError;

#[derive(Clone, Debug)]
pub struct HandlerConfig {
    /// Advertised in our `Status`: ask peers to push diff layers to us.
    pub light_sync: bool,
    pub handshake_timeout: Duration,
}

/// Snapshot of one connected peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: String,
    pub version: u32,
    pub light_sync: bool,
    pub state: PeerState,
    pub score: i32,
    /// Unix seconds of the last packet from this peer's host.
    pub last_seen_secs: u64,
    pub pending_requests: usize,
}

pub struct DiffHandler {
    chain: Arc<BlockChain>,
    peers: PeerSet,
    reputation: Arc<PeerReputation>,
    metrics: Arc<DiffSyncMetrics>,
    config: HandlerConfig,
    next_request_id: AtomicU64,
    /// Set by [`DiffHandler::disconnect_all`]; no peer is admitted after.
    closing: watch::Sender<bool>,
}

impl DiffHandler {
    pub fn new(
        chain: Arc<BlockChain>,
        reputation: Arc<PeerReputation>,
        metrics: Arc<DiffSyncMetrics>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            chain,
            peers: PeerSet::new(),
            reputation,
            metrics,
            config,
            next_request_id: AtomicU64::new(1),
            closing: watch::Sender::new(false),
        }
    }

    pub fn chain(&self) -> &Arc<BlockChain> {
        &self.chain
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn metrics(&self) -> &DiffSyncMetrics {
        &self.metrics
    }

    /// Serve one connection: handshake, register, read until it ends,
    /// unregister. A clean remote hangup is `Ok`.
    pub async fn run_peer(&self, transport: Arc<dyn MsgReadWriter>) -> Result<(), NodeError> {
        let peer_id = transport.remote_id().to_string();
        if self.is_closing() {
            transport.close().await;
            return Err(NodeError::ShuttingDown);
        }
        if !self.reputation.admit(&peer_id) {
            debug!(peer = %peer_id, "connection refused");
            transport.close().await;
            return Err(NodeError::PeerRefused(peer_id));
        }

        let peer = Arc::new(DiffPeer::new(transport));
        let handshake = tokio::select! {
            result = peer.handshake(self.config.light_sync, self.config.handshake_timeout) => {
                result.map_err(NodeError::from)
            }
            _ = self.closing() => Err(NodeError::ShuttingDown),
        };
        if let Err(e) = handshake {
            peer.close().await;
            self.reputation.disconnected(&peer_id);
            return Err(e);
        }
        if !self.peers.register(Arc::clone(&peer)).await {
            debug!(peer = %peer_id, "duplicate connection dropped");
            peer.close().await;
            self.reputation.disconnected(&peer_id);
            return Err(NodeError::PeerRefused(peer_id));
        }
        // `disconnect_all` raises the flag before draining, so a peer
        // registered after the drain sees it here.
        if self.is_closing() {
            self.peers.unregister(&peer_id).await;
            peer.close().await;
            self.reputation.disconnected(&peer_id);
            return Err(NodeError::ShuttingDown);
        }
        self.metrics.peer_count.set(self.peers.len().await as i64);
        info!(
            parent: peer.span(),
            version = peer.version(),
            light_sync = peer.light_sync(),
            "peer active"
        );

        let result = self.read_loop(&peer).instrument(peer.span().clone()).await;

        if let Some(entry) = self.peers.unregister(&peer_id).await {
            let dropped = entry.pending_len();
            if dropped > 0 {
                debug!(parent: peer.span(), dropped, "discarded pending requests");
            }
        }
        peer.close().await;
        self.reputation.disconnected(&peer_id);
        self.metrics.peer_count.set(self.peers.len().await as i64);
        match &result {
            Ok(()) => info!(parent: peer.span(), "peer disconnected"),
            Err(e) => info!(parent: peer.span(), error = %e, "peer disconnected with error"),
        }
        result
    }

    async fn read_loop(&self, peer: &DiffPeer) -> Result<(), NodeError> {
        loop {
            let read = tokio::select! {
                read = peer.read_packet() => read,
                _ = peer.closed() => return Ok(()),
            };
            let packet = match read {
                Ok(packet) => packet,
                Err(NetworkError::Closed) => return Ok(()),
                Err(NetworkError::Protocol(e)) => {
                    return Err(self.violation(peer, format!("undecodable packet: {e}")));
                }
                Err(e) => return Err(e.into()),
            };

            self.reputation.touch(peer.id());
            let span = packet_recv_span(peer.id(), packet.kind().as_str());
            self.handle(peer, packet).instrument(span).await?;

            if self.reputation.is_banned(peer.id()) {
                info!("disconnecting banned peer");
                return Ok(());
            }
        }
    }

    /// Dispatch one packet from an active peer. An error means the peer
    /// must be disconnected.
    pub async fn handle(&self, peer: &DiffPeer, packet: DiffPacket) -> Result<(), NodeError> {
        match packet {
            DiffPacket::Status(_) => Err(self.violation(peer, "status after handshake".into())),
            DiffPacket::DiffLayers(packet) => {
                self.on_diff_layers(peer, packet);
                Ok(())
            }
            DiffPacket::GetDiffLayer(packet) => self.on_get_diff_layer(peer, packet).await,
            DiffPacket::DiffLayerResponse(packet) => {
                self.on_diff_layer_response(peer, packet).await;
                Ok(())
            }
        }
    }

    fn on_diff_layers(&self, peer: &DiffPeer, packet: DiffLayersPacket) {
        for raw in packet.diffs {
            self.metrics.diffs_received.inc();
            match self.chain.handle_raw_diff_layer(raw, peer.id()) {
                Ok(block) => {
                    self.reputation.reward(peer.id(), ACCEPTED_DIFF_REWARD);
                    debug!(block = %block.short(), "diff layer received");
                }
                Err(e) => debug!(error = %e, "diff layer dropped"),
            }
        }
        self.observe_chain();
    }

    async fn on_get_diff_layer(
        &self,
        peer: &DiffPeer,
        packet: GetDiffLayerPacket,
    ) -> Result<(), NodeError> {
        let diff = self.chain.get_diff_layer_raw(&packet.block_hash);
        let response = match diff {
            Some(raw) => {
                self.metrics.queries_served.inc();
                DiffLayerResponsePacket {
                    request_id: packet.request_id,
                    block_hash: packet.block_hash,
                    diff: Some(raw),
                }
            }
            None => {
                self.metrics.queries_missed.inc();
                debug!(block = %packet.block_hash.short(), "diff layer query missed");
                DiffLayerResponsePacket::not_found(packet.request_id, packet.block_hash)
            }
        };
        peer.send(&DiffPacket::DiffLayerResponse(response)).await?;
        Ok(())
    }

    async fn on_diff_layer_response(&self, peer: &DiffPeer, packet: DiffLayerResponsePacket) {
        let expected = match self.peers.get(peer.id()).await {
            Some(entry) => entry.take_pending(packet.request_id),
            None => None,
        };
        let Some(expected) = expected else {
            warn!(request_id = packet.request_id, "unsolicited diff layer response");
            self.reputation
                .report(peer.id(), packet.block_hash, DiffFault::Unsolicited);
            return;
        };

        let Some(raw) = packet.diff else {
            debug!(block = %expected.short(), "peer has no diff layer for block");
            return;
        };
        self.metrics.diffs_received.inc();
        match self
            .chain
            .handle_requested_diff_layer(raw, peer.id(), expected)
        {
            Ok(block) => {
                self.reputation.reward(peer.id(), ACCEPTED_DIFF_REWARD);
                debug!(block = %block.short(), "requested diff layer received");
            }
            Err(e) => debug!(error = %e, "requested diff layer dropped"),
        }
        self.observe_chain();
    }

    /// Ask `peer_id` for the diff layer of `block_hash`. The answer arrives
    /// through the peer's read loop; returns the request id.
    pub async fn request_diff_layer(
        &self,
        peer_id: &str,
        block_hash: BlockHash,
    ) -> Result<u64, NodeError> {
        let entry = self
            .peers
            .get(peer_id)
            .await
            .ok_or_else(|| NetworkError::PeerNotFound(peer_id.to_string()))?;
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        entry.add_pending(request_id, block_hash);
        let packet = DiffPacket::GetDiffLayer(GetDiffLayerPacket {
            request_id,
            block_hash,
        });
        if let Err(e) = entry.peer().send(&packet).await {
            entry.take_pending(request_id);
            return Err(e.into());
        }
        Ok(request_id)
    }

    /// Push the cached diff for `block_hash` to every active light-sync
    /// peer. Returns how many peers it was sent to.
    pub async fn broadcast_diff_layer(&self, block_hash: BlockHash) -> usize {
        let Some(raw) = self.chain.get_diff_layer_raw(&block_hash) else {
            return 0;
        };
        let targets = self.peers.light_sync_peers().await;
        let span = diff_broadcast_span(&block_hash, targets.len());
        async {
            let packet = DiffPacket::DiffLayers(DiffLayersPacket { diffs: vec![raw] });
            let mut sent = 0;
            for peer in targets {
                match peer.send(&packet).await {
                    Ok(()) => sent += 1,
                    Err(e) => debug!(peer = %peer.id(), error = %e, "diff broadcast failed"),
                }
            }
            sent
        }
        .instrument(span)
        .await
    }

    pub async fn peer_info(&self, peer_id: &str) -> Option<PeerInfo> {
        let entry = self.peers.get(peer_id).await?;
        let peer = entry.peer();
        Some(PeerInfo {
            id: peer.id().to_string(),
            version: peer.version(),
            light_sync: peer.light_sync(),
            state: peer.state(),
            score: self.reputation.score(peer_id),
            last_seen_secs: self
                .reputation
                .record(peer_id)
                .map_or(0, |record| record.last_seen_secs),
            pending_requests: entry.pending_len(),
        })
    }

    /// Close one peer's connection. Its read loop then unregisters it.
    pub async fn disconnect(&self, peer_id: &str) -> bool {
        match self.peers.get(peer_id).await {
            Some(entry) => {
                entry.peer().close().await;
                true
            }
            None => false,
        }
    }

    /// Close every connection whose host is banned. Returns how many were
    /// closed.
    pub async fn disconnect_banned(&self) -> usize {
        let mut closed = 0;
        for peer_id in self.peers.ids().await {
            if self.reputation.is_banned(&peer_id) && self.disconnect(&peer_id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Close every connection and refuse new ones, including those still
    /// handshaking.
    pub async fn disconnect_all(&self) {
        self.closing.send_replace(true);
        for peer in self.peers.drain().await {
            peer.close().await;
        }
        self.metrics.peer_count.set(0);
    }

    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    async fn closing(&self) {
        let mut rx = self.closing.subscribe();
        let _ = rx.wait_for(|closing| *closing).await;
    }

    /// Refresh chain-derived metrics.
    pub fn observe_chain(&self) {
        self.metrics.observe_chain(
            &self.chain.stats().snapshot(),
            self.chain.diff_cache().len(),
        );
    }

    fn violation(&self, peer: &DiffPeer, reason: String) -> NodeError {
        warn!(%reason, "protocol violation");
        self.metrics.protocol_violations.inc();
        self.reputation
            .penalize(peer.id(), PenaltyReason::ProtocolViolation);
        NodeError::ProtocolViolation {
            peer: peer.id().to_string(),
            reason,
        }
    }
}
