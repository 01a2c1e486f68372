//! Packet types of the `diff` sub-protocol.
//!
//! The protocol is a closed set of four packets. Diff layers travel as raw
//! encoded bytes so that the receiver can hash exactly what it received.

use dsync_types::BlockHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every packet exchanged on a `diff` connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffPacket {
    /// Handshake: first packet in each direction.
    Status(StatusPacket),
    /// Unsolicited push of freshly computed diff layers.
    DiffLayers(DiffLayersPacket),
    /// Ask a peer for the diff layer of one block.
    GetDiffLayer(GetDiffLayerPacket),
    /// Answer to [`DiffPacket::GetDiffLayer`].
    DiffLayerResponse(DiffLayerResponsePacket),
}

impl DiffPacket {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Status(_) => PacketKind::Status,
            Self::DiffLayers(_) => PacketKind::DiffLayers,
            Self::GetDiffLayer(_) => PacketKind::GetDiffLayer,
            Self::DiffLayerResponse(_) => PacketKind::DiffLayerResponse,
        }
    }
}

/// Discriminant of a [`DiffPacket`], used in logs and metrics labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Status,
    DiffLayers,
    GetDiffLayer,
    DiffLayerResponse,
}

impl PacketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::DiffLayers => "diff_layers",
            Self::GetDiffLayer => "get_diff_layer",
            Self::DiffLayerResponse => "diff_layer_response",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake payload: protocol version and light-sync capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPacket {
    pub protocol_version: u32,
    /// Whether the sender wants diff layers pushed to it.
    pub light_sync: bool,
}

/// Raw encoded diff layers, one entry per block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLayersPacket {
    pub diffs: Vec<Vec<u8>>,
}

/// Request for the diff layer of `block_hash`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDiffLayerPacket {
    pub request_id: u64,
    pub block_hash: BlockHash,
}

/// Response carrying the raw diff, or `None` when the peer has none cached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLayerResponsePacket {
    pub request_id: u64,
    pub block_hash: BlockHash,
    pub diff: Option<Vec<u8>>,
}

impl DiffLayerResponsePacket {
    pub fn not_found(request_id: u64, block_hash: BlockHash) -> Self {
        Self {
            request_id,
            block_hash,
            diff: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        let status = DiffPacket::Status(StatusPacket {
            protocol_version: 1,
            light_sync: true,
        });
        assert_eq!(status.kind(), PacketKind::Status);

        let get = DiffPacket::GetDiffLayer(GetDiffLayerPacket {
            request_id: 7,
            block_hash: BlockHash::new([1; 32]),
        });
        assert_eq!(get.kind().as_str(), "get_diff_layer");
    }

    #[test]
    fn not_found_response_has_no_payload() {
        let resp = DiffLayerResponsePacket::not_found(3, BlockHash::new([2; 32]));
        assert!(resp.diff.is_none());
        assert_eq!(resp.request_id, 3);
    }

    #[test]
    fn unknown_variant_tag_is_rejected() {
        // bincode encodes the variant index as a little-endian u32 first.
        let mut bytes = bincode::serialize(&DiffPacket::DiffLayers(DiffLayersPacket::default()))
            .unwrap();
        bytes[0] = 42;
        assert!(bincode::deserialize::<DiffPacket>(&bytes).is_err());
    }
}
