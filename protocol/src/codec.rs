//! Packet codec: bincode envelopes and 4-byte big-endian length framing.

use bincode::Options;
use dsync_messages::DiffPacket;

use crate::ProtocolError;

/// Maximum message size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Length of the frame header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Fixed-width integers, size limit, trailing bytes rejected.
fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_MESSAGE_SIZE as u64)
}

/// Serialize a packet into its envelope bytes (no frame header).
pub fn encode_packet(packet: &DiffPacket) -> Result<Vec<u8>, ProtocolError> {
    let bytes = options()
        .serialize(packet)
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bytes)
}

/// Strictly decode an envelope. Unknown tags, truncation and trailing bytes
/// all fail with [`ProtocolError::Malformed`].
pub fn decode_packet(bytes: &[u8]) -> Result<DiffPacket, ProtocolError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    options()
        .deserialize(bytes)
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Prepend the length header to an envelope.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Parse a frame header, rejecting bodies larger than `max`.
pub fn frame_body_len(header: [u8; FRAME_HEADER_LEN], max: usize) -> Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > max {
        return Err(ProtocolError::MessageTooLarge { size: len, max });
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsync_messages::{DiffLayerResponsePacket, GetDiffLayerPacket, StatusPacket};
    use dsync_types::BlockHash;

    #[test]
    fn status_roundtrip() {
        let packet = DiffPacket::Status(StatusPacket {
            protocol_version: 1,
            light_sync: true,
        });
        let bytes = encode_packet(&packet).unwrap();
        assert_eq!(decode_packet(&bytes).unwrap(), packet);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let packet = DiffPacket::GetDiffLayer(GetDiffLayerPacket {
            request_id: 1,
            block_hash: BlockHash::new([9; 32]),
        });
        let mut bytes = encode_packet(&packet).unwrap();
        bytes.push(0);
        assert!(matches!(decode_packet(&bytes), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let packet = DiffPacket::DiffLayerResponse(DiffLayerResponsePacket {
            request_id: 5,
            block_hash: BlockHash::new([3; 32]),
            diff: Some(vec![1, 2, 3, 4]),
        });
        let bytes = encode_packet(&packet).unwrap();
        assert!(decode_packet(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bytes = 99u32.to_le_bytes();
        assert!(matches!(decode_packet(&bytes), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn frame_header_is_big_endian_length() {
        let framed = frame(&[0xaa; 300]).unwrap();
        assert_eq!(&framed[..4], &300u32.to_be_bytes());
        assert_eq!(framed.len(), 304);
        assert_eq!(frame_body_len([0, 0, 1, 44], MAX_MESSAGE_SIZE).unwrap(), 300);
    }

    #[test]
    fn oversized_frame_header_is_rejected() {
        let header = ((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes();
        assert!(matches!(
            frame_body_len(header, MAX_MESSAGE_SIZE),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }
}
