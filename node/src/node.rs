//! Node wiring: chain, handler, TCP listener and background tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dsync_chain::{Block, BlockChain, DiffFaultReporter};
use dsync_network::{MsgReadWriter, TcpTransport};
use dsync_store::ChainStore;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::NodeConfig;
use crate::handler::{DiffHandler, HandlerConfig};
use crate::metrics::DiffSyncMetrics;
use crate::reputation::PeerReputation;
use crate::shutdown::ShutdownController;
use crate::tracing_spans::{connection_span, import_span};
use crate::NodeError;

/// How long `stop` waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between expired-ban sweeps.
const BAN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Interval between metric refreshes when metrics are enabled.
const METRICS_INTERVAL: Duration = Duration::from_secs(5);

/// A node speaking the `diff` sub-protocol over TCP.
pub struct DiffNode {
    config: NodeConfig,
    chain: Arc<BlockChain>,
    handler: Arc<DiffHandler>,
    reputation: Arc<PeerReputation>,
    shutdown: ShutdownController,
    /// Taken by `start`.
    bans: Option<mpsc::UnboundedReceiver<String>>,
    local_addr: Option<SocketAddr>,
    /// Handles for spawned background tasks (joined during shutdown).
    task_handles: Vec<JoinHandle<()>>,
}

impl DiffNode {
    /// Open the chain in `store` and prepare the handler. Call
    /// [`DiffNode::start`] to begin accepting connections.
    pub fn new(config: NodeConfig, store: Arc<dyn ChainStore>) -> Result<Self, NodeError> {
        let genesis = config.genesis()?;
        let chain = Arc::new(BlockChain::new(store, config.chain_config(), &genesis)?);

        let (reputation, bans) = PeerReputation::new(config.max_peers);
        let reputation = Arc::new(reputation);
        let reporter: Arc<dyn DiffFaultReporter> = reputation.clone();
        chain.set_fault_reporter(reporter);

        let metrics = Arc::new(DiffSyncMetrics::new()?);
        let handler = Arc::new(DiffHandler::new(
            Arc::clone(&chain),
            Arc::clone(&reputation),
            metrics,
            HandlerConfig {
                light_sync: config.light_process,
                handshake_timeout: config.handshake_timeout(),
            },
        ));
        tracing::info!(
            head = chain.head_number(),
            light = chain.light_processor_enabled(),
            "dsync node created"
        );

        Ok(Self {
            config,
            chain,
            handler,
            reputation,
            shutdown: ShutdownController::new(),
            bans: Some(bans),
            local_addr: None,
            task_handles: Vec::new(),
        })
    }

    pub fn chain(&self) -> &Arc<BlockChain> {
        &self.chain
    }

    pub fn handler(&self) -> &Arc<DiffHandler> {
        &self.handler
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener, spawn background tasks and dial bootstrap peers.
    pub async fn start(&mut self) -> Result<SocketAddr, NodeError> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);
        tracing::info!(%addr, "P2P listener started");

        let handle = self.spawn_accept_loop(listener);
        self.task_handles.push(handle);

        if let Some(bans) = self.bans.take() {
            let handle = self.spawn_ban_enforcer(bans);
            self.task_handles.push(handle);
        }

        let handle = self.spawn_ban_sweeper();
        self.task_handles.push(handle);

        if self.config.enable_metrics {
            let handle = self.spawn_metrics_refresh();
            self.task_handles.push(handle);
        }

        for peer in self.config.bootstrap_peers.clone() {
            if let Err(e) = self.connect(&peer).await {
                tracing::warn!(peer = %peer, error = %e, "bootstrap peer unreachable");
            }
        }
        Ok(addr)
    }

    /// Dial `addr` and serve the connection in the background.
    pub async fn connect(&self, addr: &str) -> Result<(), NodeError> {
        let transport = TcpTransport::connect(addr).await?;
        self.serve(Arc::new(transport), false);
        Ok(())
    }

    /// Serve an already established connection in the background.
    pub fn serve(&self, transport: Arc<dyn MsgReadWriter>, inbound: bool) {
        spawn_peer(Arc::clone(&self.handler), transport, inbound);
    }

    /// Insert blocks, then push the resulting diff layers to light-sync
    /// peers.
    pub async fn import_blocks(&self, blocks: &[Block]) -> Result<usize, NodeError> {
        let Some(first) = blocks.first() else {
            return Ok(0);
        };
        let light = self.chain.light_processor_enabled();
        let span = import_span(first.number(), blocks.len(), light);
        let chain = Arc::clone(&self.chain);
        let batch = blocks.to_vec();
        // Insertion takes the chain's insert lock and does store I/O.
        let inserted = tokio::task::spawn_blocking(move || {
            span.in_scope(|| chain.insert_chain(&batch))
        })
        .await??;

        for block in blocks {
            self.handler.broadcast_diff_layer(block.hash()).await;
        }
        self.handler.observe_chain();
        Ok(inserted)
    }

    pub fn metrics_text(&self) -> Result<String, NodeError> {
        self.handler.observe_chain();
        self.handler.metrics().encode_text()
    }

    /// Block until SIGINT/SIGTERM, then run [`DiffNode::stop`].
    pub async fn run_until_signal(&mut self) -> Result<(), NodeError> {
        self.shutdown.wait_for_signal().await?;
        self.stop().await
    }

    /// Signal every task, close every connection and wait for the tasks.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::info!("dsync node stopping");

        self.shutdown.shutdown();
        self.handler.disconnect_all().await;

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all)
            .await
            .is_err()
        {
            tracing::warn!(
                "shutdown timeout ({:?}), some tasks may still be running",
                SHUTDOWN_TIMEOUT
            );
        }

        self.handler.observe_chain();
        tracing::info!("dsync node stopped");
        Ok(())
    }

    fn spawn_accept_loop(&self, listener: TcpListener) -> JoinHandle<()> {
        let handler = Arc::clone(&self.handler);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("P2P listener shutting down");
                        break;
                    }
                    result = listener.accept() => match result {
                        Ok((stream, addr)) => match TcpTransport::from_stream(stream) {
                            Ok(transport) => {
                                spawn_peer(Arc::clone(&handler), Arc::new(transport), true);
                            }
                            Err(e) => tracing::warn!(%addr, error = %e, "failed to set up inbound connection"),
                        },
                        Err(e) => tracing::warn!(error = %e, "P2P accept error"),
                    },
                }
            }
        })
    }

    fn spawn_ban_enforcer(&self, mut bans: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        let handler = Arc::clone(&self.handler);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    banned = bans.recv() => match banned {
                        Some(host) => {
                            let closed = handler.disconnect_banned().await;
                            if closed > 0 {
                                tracing::info!(%host, closed, "banned host disconnected");
                            }
                        }
                        None => break,
                    },
                }
            }
        })
    }

    fn spawn_ban_sweeper(&self) -> JoinHandle<()> {
        let reputation = Arc::clone(&self.reputation);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(BAN_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => reputation.expire_bans(),
                }
            }
        })
    }

    fn spawn_metrics_refresh(&self) -> JoinHandle<()> {
        let handler = Arc::clone(&self.handler);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => handler.observe_chain(),
                }
            }
        })
    }
}

/// Run one connection to completion on its own task.
fn spawn_peer(handler: Arc<DiffHandler>, transport: Arc<dyn MsgReadWriter>, inbound: bool) {
    let span = connection_span(transport.remote_id(), inbound);
    tokio::spawn(
        async move {
            if let Err(e) = handler.run_peer(transport).await {
                tracing::debug!(error = %e, "connection ended");
            }
        }
        .instrument(span),
    );
}
