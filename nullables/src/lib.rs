//! Nullable infrastructure for deterministic testing.
//!
//! External dependencies (storage, the wire) sit behind traits. This crate
//! provides test-friendly implementations that:
//! - Keep everything in memory
//! - Can be controlled programmatically (failure injection, recorded frames)
//! - Never touch the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod network;
pub mod store;

pub use network::NullTransport;
pub use store::NullStore;
