use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("unexpected {0} packet")]
    UnexpectedPacket(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
