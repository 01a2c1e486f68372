//! Prometheus metrics for diff-layer sync.
//!
//! [`DiffSyncMetrics`] owns a dedicated [`Registry`]. Counters that mirror
//! chain activity are brought up to date from [`ChainStatsSnapshot`]s; the
//! handler bumps the protocol-level ones directly.

use dsync_chain::ChainStatsSnapshot;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};

use crate::NodeError;

pub struct DiffSyncMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Raw diff layers received from peers, before validation.
    pub diffs_received: IntCounter,
    /// Diff layers that passed intake and were cached.
    pub diffs_accepted: IntCounter,
    /// Diff layers refused at intake (malformed, too large, conflicting).
    pub diffs_rejected: IntCounter,
    /// Blocks committed from a diff layer.
    pub light_blocks: IntCounter,
    /// Blocks whose cached diff failed verification.
    pub light_fallbacks: IntCounter,
    /// Blocks committed by executing their transactions.
    pub full_blocks: IntCounter,
    /// `GetDiffLayer` queries answered with a diff.
    pub queries_served: IntCounter,
    /// `GetDiffLayer` queries answered with not-found.
    pub queries_missed: IntCounter,
    /// Peers disconnected for breaking the packet rules.
    pub protocol_violations: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Diff layers currently cached.
    pub cache_size: IntGauge,
    /// Peers that completed the handshake and are still connected.
    pub peer_count: IntGauge,
}

impl DiffSyncMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Result<Self, NodeError> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| {
            register_int_counter_with_registry!(Opts::new(name, help), registry)
        };
        let diffs_received = counter(
            "dsync_diffs_received_total",
            "Raw diff layers received from peers",
        )?;
        let diffs_accepted = counter("dsync_diffs_accepted_total", "Diff layers cached")?;
        let diffs_rejected = counter(
            "dsync_diffs_rejected_total",
            "Diff layers refused at intake",
        )?;
        let light_blocks = counter(
            "dsync_light_blocks_total",
            "Blocks inserted from diff layers",
        )?;
        let light_fallbacks = counter(
            "dsync_light_fallbacks_total",
            "Blocks re-executed after a diff failed verification",
        )?;
        let full_blocks = counter(
            "dsync_full_blocks_total",
            "Blocks inserted by full execution",
        )?;
        let queries_served = counter(
            "dsync_queries_served_total",
            "Diff layer queries answered with data",
        )?;
        let queries_missed = counter(
            "dsync_queries_missed_total",
            "Diff layer queries answered with not-found",
        )?;
        let protocol_violations = counter(
            "dsync_protocol_violations_total",
            "Peers disconnected for protocol violations",
        )?;

        let cache_size = register_int_gauge_with_registry!(
            Opts::new("dsync_diff_cache_size", "Diff layers currently cached"),
            registry
        )?;
        let peer_count = register_int_gauge_with_registry!(
            Opts::new("dsync_peer_count", "Current number of active peers"),
            registry
        )?;

        Ok(Self {
            registry,
            diffs_received,
            diffs_accepted,
            diffs_rejected,
            light_blocks,
            light_fallbacks,
            full_blocks,
            queries_served,
            queries_missed,
            protocol_violations,
            cache_size,
            peer_count,
        })
    }

    /// Bring the chain-side counters up to `stats`.
    pub fn observe_chain(&self, stats: &ChainStatsSnapshot, cache_len: usize) {
        advance(&self.diffs_accepted, stats.diffs_accepted);
        advance(&self.diffs_rejected, stats.diffs_rejected);
        advance(&self.light_blocks, stats.light_applied);
        advance(&self.light_fallbacks, stats.light_fallbacks);
        advance(&self.full_blocks, stats.full_executed);
        self.cache_size.set(cache_len as i64);
    }

    /// Prometheus text exposition of every metric.
    pub fn encode_text(&self) -> Result<String, NodeError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| NodeError::Config(e.to_string()))
    }
}

/// Counters only go up; catch one up to an externally kept total.
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_chain_is_idempotent() {
        let metrics = DiffSyncMetrics::new().unwrap();
        let stats = ChainStatsSnapshot {
            light_applied: 3,
            full_executed: 2,
            diffs_accepted: 5,
            ..Default::default()
        };
        metrics.observe_chain(&stats, 4);
        metrics.observe_chain(&stats, 4);
        assert_eq!(metrics.light_blocks.get(), 3);
        assert_eq!(metrics.full_blocks.get(), 2);
        assert_eq!(metrics.diffs_accepted.get(), 5);
        assert_eq!(metrics.cache_size.get(), 4);
    }

    #[test]
    fn text_exposition_names_metrics() {
        let metrics = DiffSyncMetrics::new().unwrap();
        metrics.queries_served.inc();
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("dsync_queries_served_total 1"));
        assert!(text.contains("dsync_peer_count"));
    }
}
