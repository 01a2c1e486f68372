//! dsync node: serves and consumes diff layers over the `diff` sub-protocol.
//!
//! The node wires together:
//! - the chain with its diff cache and light processor (`dsync-chain`)
//! - the protocol handler that feeds received diffs into that cache and
//!   answers diff queries ([`DiffHandler`])
//! - peer scoring that turns diff faults into bans ([`PeerReputation`])
//! - a TCP listener, background tasks and graceful shutdown ([`DiffNode`])

pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod peer_set;
pub mod reputation;
pub mod shutdown;
pub mod tracing_spans;

pub use config::{ChainSection, GenesisAlloc, GenesisSection, NodeConfig};
pub use error::NodeError;
pub use handler::{DiffHandler, HandlerConfig, PeerInfo};
pub use logging::{init_logging, try_init_logging, LogFormat};
pub use metrics::DiffSyncMetrics;
pub use node::DiffNode;
pub use peer_set::{PeerEntry, PeerSet};
pub use reputation::PeerReputation;
pub use shutdown::ShutdownController;
