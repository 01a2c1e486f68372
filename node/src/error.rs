use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("chain error: {0}")]
    Chain(#[from] dsync_chain::ChainError),

    #[error("block insertion failed: {0}")]
    Insert(#[from] dsync_chain::InsertError),

    #[error("network error: {0}")]
    Network(#[from] dsync_network::NetworkError),

    #[error("protocol error: {0}")]
    Protocol(#[from] dsync_protocol::ProtocolError),

    #[error("store error: {0}")]
    Store(#[from] dsync_store::StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("peer {0} refused: banned or connection limit reached")]
    PeerRefused(String),

    #[error("node is shutting down")]
    ShuttingDown,

    #[error("peer {peer} violated the protocol: {reason}")]
    ProtocolViolation { peer: String, reason: String },

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("logging already initialized: {0}")]
    Logging(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
