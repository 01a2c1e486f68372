//! Pre-built [`tracing::Span`] constructors for common node operations.
//!
//! Using consistent span names and field sets across the codebase makes it
//! easy to filter, search, and correlate traces.

use dsync_types::BlockHash;
use tracing::{info_span, Span};

/// Span covering the handling of a single inbound packet.
pub fn packet_recv_span(peer: &str, kind: &str) -> Span {
    info_span!("packet_recv", peer = %peer, kind = %kind)
}

/// Span covering the broadcast of one diff layer to light-sync peers.
pub fn diff_broadcast_span(block: &BlockHash, peer_count: usize) -> Span {
    info_span!("diff_broadcast", block = %block.short(), peer_count = %peer_count)
}

/// Span covering one `insert_chain` call made by the node.
pub fn import_span(first: u64, count: usize, light: bool) -> Span {
    info_span!("import", first = %first, count = %count, light = %light)
}

/// Span covering one connection from accept/dial to disconnect.
pub fn connection_span(remote: &str, inbound: bool) -> Span {
    info_span!("connection", remote = %remote, inbound = %inbound)
}
