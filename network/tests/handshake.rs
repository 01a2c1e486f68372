//! Status handshake over in-memory duplex streams.

use std::sync::Arc;
use std::time::Duration;

use dsync_messages::{DiffLayersPacket, DiffPacket, GetDiffLayerPacket, StatusPacket};
use dsync_network::{DiffPeer, FramedTransport, MsgReadWriter, NetworkError, PeerState};
use dsync_protocol::{encode_packet, ProtocolError, PROTOCOL_VERSION};
use dsync_types::BlockHash;
use tokio::io::{duplex, split};

const TIMEOUT: Duration = Duration::from_millis(500);

fn transports() -> (Arc<dyn MsgReadWriter>, Arc<dyn MsgReadWriter>) {
    let (a, b) = duplex(64 * 1024);
    let (ar, aw) = split(a);
    let (br, bw) = split(b);
    (
        Arc::new(FramedTransport::new("node-b", ar, aw)),
        Arc::new(FramedTransport::new("node-a", br, bw)),
    )
}

#[tokio::test]
async fn both_sides_become_active() {
    let (ta, tb) = transports();
    let a = DiffPeer::new(ta);
    let b = DiffPeer::new(tb);
    assert_eq!(a.state(), PeerState::Idle);

    let (ra, rb) = tokio::join!(a.handshake(false, TIMEOUT), b.handshake(true, TIMEOUT));
    let ra = ra.unwrap();
    let rb = rb.unwrap();

    assert_eq!(ra.version, PROTOCOL_VERSION);
    assert!(ra.remote_light_sync, "a sees b's light-sync flag");
    assert!(!rb.remote_light_sync);
    assert!(a.is_active() && b.is_active());
    assert!(a.light_sync());
    assert_eq!(b.version(), PROTOCOL_VERSION);
    assert_eq!(a.id(), "node-b");
}

#[tokio::test]
async fn packets_flow_after_handshake() {
    let (ta, tb) = transports();
    let a = DiffPeer::new(ta);
    let b = DiffPeer::new(tb);
    let (ra, rb) = tokio::join!(a.handshake(false, TIMEOUT), b.handshake(false, TIMEOUT));
    ra.unwrap();
    rb.unwrap();

    let packet = DiffPacket::GetDiffLayer(GetDiffLayerPacket {
        request_id: 9,
        block_hash: BlockHash::new([4; 32]),
    });
    a.send(&packet).await.unwrap();
    assert_eq!(b.read_packet().await.unwrap(), packet);
}

#[tokio::test]
async fn unsupported_version_closes_peer() {
    let (ta, tb) = transports();
    let a = DiffPeer::new(ta);
    let bad = encode_packet(&DiffPacket::Status(StatusPacket {
        protocol_version: PROTOCOL_VERSION + 7,
        light_sync: false,
    }))
    .unwrap();
    tb.write_frame(&bad).await.unwrap();

    let err = a.handshake(false, TIMEOUT).await.unwrap_err();
    assert!(matches!(
        err,
        NetworkError::Protocol(ProtocolError::UnsupportedVersion(_))
    ));
    assert_eq!(a.state(), PeerState::Closed);
}

#[tokio::test]
async fn non_status_first_packet_closes_peer() {
    let (ta, tb) = transports();
    let a = DiffPeer::new(ta);
    let first = encode_packet(&DiffPacket::DiffLayers(DiffLayersPacket::default())).unwrap();
    tb.write_frame(&first).await.unwrap();

    let err = a.handshake(false, TIMEOUT).await.unwrap_err();
    assert!(matches!(
        err,
        NetworkError::Protocol(ProtocolError::UnexpectedPacket(_))
    ));
    assert_eq!(a.state(), PeerState::Closed);
}

#[tokio::test]
async fn silent_remote_times_out() {
    let (ta, _tb) = transports();
    let a = DiffPeer::new(ta);
    let err = a
        .handshake(false, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NetworkError::Protocol(ProtocolError::HandshakeTimeout(_))
    ));
    assert_eq!(a.state(), PeerState::Closed);
}

#[tokio::test]
async fn remote_hangup_fails_handshake() {
    let (ta, tb) = transports();
    let a = DiffPeer::new(ta);
    tb.close().await;
    let err = a.handshake(false, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, NetworkError::Closed));
}

#[tokio::test]
async fn garbage_status_fails_handshake() {
    let (ta, tb) = transports();
    let a = DiffPeer::new(ta);
    tb.write_frame(&[0xde, 0xad]).await.unwrap();
    let err = a.handshake(false, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, NetworkError::Protocol(ProtocolError::Malformed(_))));
}

#[tokio::test]
async fn send_requires_active_state() {
    let (ta, _tb) = transports();
    let a = DiffPeer::new(ta);
    let err = a
        .send(&DiffPacket::DiffLayers(DiffLayersPacket::default()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NetworkError::NotActive {
            state: PeerState::Idle,
            ..
        }
    ));

    a.close().await;
    assert_eq!(a.state(), PeerState::Closed);
    assert!(a.handshake(false, TIMEOUT).await.is_err());
}

#[tokio::test]
async fn close_wakes_closed_waiters() {
    let (ta, _tb) = transports();
    let a = Arc::new(DiffPeer::new(ta));
    let waiter = {
        let a = Arc::clone(&a);
        tokio::spawn(async move { a.closed().await })
    };
    a.close().await;
    tokio::time::timeout(TIMEOUT, waiter).await.unwrap().unwrap();

    // Already closed: resolves immediately.
    tokio::time::timeout(TIMEOUT, a.closed()).await.unwrap();
}

#[tokio::test]
async fn close_during_handshake_stays_closed() {
    // The remote never answers, so only the close can end the handshake.
    let (ta, _tb) = transports();
    let a = Arc::new(DiffPeer::new(ta));
    let handshake = {
        let a = Arc::clone(&a);
        tokio::spawn(async move { a.handshake(false, Duration::from_secs(30)).await })
    };
    while a.state() != PeerState::Handshaking {
        tokio::task::yield_now().await;
    }
    a.close().await;

    let result = tokio::time::timeout(TIMEOUT, handshake).await.unwrap().unwrap();
    assert!(matches!(result, Err(NetworkError::Closed)));
    assert_eq!(a.state(), PeerState::Closed);
    assert!(!a.is_active());
}
