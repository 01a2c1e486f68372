use thiserror::Error;

use crate::peer::PeerState;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("peer {0} not found")]
    PeerNotFound(String),

    #[error("peer {peer} is {state:?}, not active")]
    NotActive { peer: String, state: PeerState },

    #[error("connection closed by remote")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(#[from] dsync_protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
