//! Networking for the `diff` sub-protocol.
//!
//! A [`DiffPeer`] wraps a message transport ([`MsgReadWriter`]) and walks the
//! `Idle → Handshaking → Active → Closed` lifecycle. [`PeerManager`] keeps
//! reputation scores and bans across connections.

pub mod error;
pub mod peer;
pub mod peer_manager;
pub mod transport;

pub use error::NetworkError;
pub use peer::{DiffPeer, PeerState};
pub use peer_manager::{PeerManager, PeerRecord, PenaltyReason};
pub use transport::{FramedTransport, MsgReadWriter, TcpTransport};
