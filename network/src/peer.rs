//! A remote node speaking the `diff` sub-protocol.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dsync_messages::DiffPacket;
use dsync_protocol::handshake::{local_status, negotiate, NegotiatedStatus};
use dsync_protocol::{decode_packet, encode_packet, ProtocolError, PROTOCOL_VERSION};
use tokio::sync::watch;
use tracing::{debug, info_span, Instrument, Span};

use crate::transport::MsgReadWriter;
use crate::NetworkError;

/// Connection lifecycle. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Handshaking,
    Active,
    Closed,
}

/// One connection. Holds no diff data; everything it receives is handed to
/// the protocol handler.
pub struct DiffPeer {
    id: String,
    transport: Arc<dyn MsgReadWriter>,
    state: Mutex<PeerState>,
    /// Negotiated version, zero until the handshake completes.
    version: AtomicU32,
    light_sync: AtomicBool,
    /// Flips to `true` once, on close.
    closed: watch::Sender<bool>,
    span: Span,
}

impl DiffPeer {
    pub fn new(transport: Arc<dyn MsgReadWriter>) -> Self {
        let id = transport.remote_id().to_string();
        let span = info_span!("diff_peer", peer = %short_id(&id));
        Self {
            id,
            transport,
            state: Mutex::new(PeerState::Idle),
            version: AtomicU32::new(0),
            light_sync: AtomicBool::new(false),
            closed: watch::Sender::new(false),
            span,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Span carrying the peer id, for instrumenting per-peer work.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock().expect("peer state lock poisoned")
    }

    pub fn is_active(&self) -> bool {
        self.state() == PeerState::Active
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Whether the remote asked to be sent diff layers.
    pub fn light_sync(&self) -> bool {
        self.light_sync.load(Ordering::Acquire)
    }

    /// Exchange `Status` packets. Any failure closes the peer.
    pub async fn handshake(
        &self,
        local_light_sync: bool,
        timeout: Duration,
    ) -> Result<NegotiatedStatus, NetworkError> {
        if !self.transition(PeerState::Idle, PeerState::Handshaking) {
            return Err(ProtocolError::HandshakeFailed(format!(
                "handshake started in state {:?}",
                self.state()
            ))
            .into());
        }

        let exchange = self
            .exchange_status(local_light_sync, timeout)
            .instrument(self.span.clone());
        let result = tokio::select! {
            result = exchange => result,
            _ = self.closed() => Err(NetworkError::Closed),
        };
        match result {
            Ok(status) => {
                self.version.store(status.version, Ordering::Release);
                self.light_sync
                    .store(status.remote_light_sync, Ordering::Release);
                if !self.transition(PeerState::Handshaking, PeerState::Active) {
                    debug!(parent: &self.span, "closed during handshake");
                    return Err(NetworkError::Closed);
                }
                debug!(
                    parent: &self.span,
                    version = status.version,
                    light_sync = status.remote_light_sync,
                    "handshake complete"
                );
                Ok(status)
            }
            Err(e) => {
                debug!(parent: &self.span, error = %e, "handshake failed");
                self.close().await;
                Err(e)
            }
        }
    }

    async fn exchange_status(
        &self,
        local_light_sync: bool,
        timeout: Duration,
    ) -> Result<NegotiatedStatus, NetworkError> {
        let status = encode_packet(&local_status(local_light_sync))?;
        self.transport.write_frame(&status).await?;

        let first = match tokio::time::timeout(timeout, self.transport.read_frame()).await {
            Ok(frame) => frame?,
            Err(_) => return Err(ProtocolError::HandshakeTimeout(timeout).into()),
        };
        let packet = decode_packet(&first)?;
        Ok(negotiate(PROTOCOL_VERSION, &packet)?)
    }

    /// Send a packet. Only allowed once the handshake has completed.
    pub async fn send(&self, packet: &DiffPacket) -> Result<(), NetworkError> {
        let state = self.state();
        if state != PeerState::Active {
            return Err(NetworkError::NotActive {
                peer: self.id.clone(),
                state,
            });
        }
        let bytes = encode_packet(packet)?;
        self.transport.write_frame(&bytes).await
    }

    /// Read and strictly decode the next packet.
    pub async fn read_packet(&self) -> Result<DiffPacket, NetworkError> {
        let frame = self.transport.read_frame().await?;
        Ok(decode_packet(&frame)?)
    }

    /// Move to `Closed` and shut the transport down. Idempotent.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.lock().expect("peer state lock poisoned");
            std::mem::replace(&mut *state, PeerState::Closed)
        };
        if previous != PeerState::Closed {
            self.closed.send_replace(true);
            self.transport.close().await;
        }
    }

    /// Resolves once [`DiffPeer::close`] has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so this only ends on `true`.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Move from `from` to `to`; false if the peer was no longer in `from`.
    fn transition(&self, from: PeerState, to: PeerState) -> bool {
        let mut state = self.state.lock().expect("peer state lock poisoned");
        if *state != from {
            return false;
        }
        *state = to;
        true
    }
}

/// At most 16 characters of a peer id, for log fields.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(16) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789abcdef");
    }
}
