//! `diff` sub-protocol: packet codec, handshake negotiation, versioning.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod version;

pub use codec::{decode_packet, encode_packet, MAX_MESSAGE_SIZE};
pub use error::ProtocolError;
pub use handshake::{local_status, negotiate, NegotiatedStatus};
pub use version::{MIN_PROTOCOL_VERSION, PROTOCOL_NAME, PROTOCOL_VERSION};
