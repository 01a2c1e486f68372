//! Status handshake negotiation.
//!
//! The transport-level exchange lives with the peer; this module only decides
//! whether the remote `Status` is acceptable and what version to speak.

use dsync_messages::{DiffPacket, StatusPacket};

use crate::version::{is_compatible, PROTOCOL_VERSION};
use crate::ProtocolError;

/// Outcome of a successful handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegotiatedStatus {
    pub version: u32,
    pub remote_light_sync: bool,
}

/// The `Status` packet this node sends first.
pub fn local_status(light_sync: bool) -> DiffPacket {
    DiffPacket::Status(StatusPacket {
        protocol_version: PROTOCOL_VERSION,
        light_sync,
    })
}

/// Validate the first packet received from a peer.
///
/// Anything other than a compatible `Status` fails the handshake.
pub fn negotiate(local_version: u32, first: &DiffPacket) -> Result<NegotiatedStatus, ProtocolError> {
    let status = match first {
        DiffPacket::Status(status) => status,
        other => return Err(ProtocolError::UnexpectedPacket(other.kind().as_str())),
    };
    if !is_compatible(status.protocol_version) {
        return Err(ProtocolError::UnsupportedVersion(status.protocol_version));
    }
    Ok(NegotiatedStatus {
        version: local_version.min(status.protocol_version),
        remote_light_sync: status.light_sync,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsync_messages::DiffLayersPacket;

    fn status(version: u32, light_sync: bool) -> DiffPacket {
        DiffPacket::Status(StatusPacket {
            protocol_version: version,
            light_sync,
        })
    }

    #[test]
    fn compatible_status_records_light_flag() {
        let negotiated = negotiate(PROTOCOL_VERSION, &status(PROTOCOL_VERSION, true)).unwrap();
        assert_eq!(negotiated.version, PROTOCOL_VERSION);
        assert!(negotiated.remote_light_sync);
    }

    #[test]
    fn version_zero_is_rejected() {
        assert!(matches!(
            negotiate(PROTOCOL_VERSION, &status(0, false)),
            Err(ProtocolError::UnsupportedVersion(0))
        ));
    }

    #[test]
    fn future_version_is_rejected() {
        let v = PROTOCOL_VERSION + 1;
        assert!(matches!(
            negotiate(PROTOCOL_VERSION, &status(v, false)),
            Err(ProtocolError::UnsupportedVersion(got)) if got == v
        ));
    }

    #[test]
    fn non_status_first_packet_is_rejected() {
        let first = DiffPacket::DiffLayers(DiffLayersPacket::default());
        assert!(matches!(
            negotiate(PROTOCOL_VERSION, &first),
            Err(ProtocolError::UnexpectedPacket("diff_layers"))
        ));
    }

    #[test]
    fn local_status_advertises_current_version() {
        match local_status(true) {
            DiffPacket::Status(s) => {
                assert_eq!(s.protocol_version, PROTOCOL_VERSION);
                assert!(s.light_sync);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
