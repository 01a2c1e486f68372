//! Nullable transport: an in-memory frame pipe between two endpoints.

use async_trait::async_trait;
use dsync_network::{MsgReadWriter, NetworkError};
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};

/// One end of an in-memory connection.
///
/// Frames written on one end are read, unchanged, on the other. Every frame
/// written is also recorded for assertions. Closing an end makes the remote
/// read [`NetworkError::Closed`] once it has drained what was already sent.
pub struct NullTransport {
    remote_id: String,
    inbox: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outbox: StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    sent: StdMutex<Vec<Vec<u8>>>,
}

impl NullTransport {
    /// Two connected ends. The first one's remote is `b_id`, the second
    /// one's remote is `a_id`.
    pub fn pair(a_id: &str, b_id: &str) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(b_id, a_rx, b_tx), Self::new(a_id, b_rx, a_tx))
    }

    fn new(
        remote_id: &str,
        inbox: mpsc::UnboundedReceiver<Vec<u8>>,
        outbox: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            inbox: Mutex::new(inbox),
            outbox: StdMutex::new(Some(outbox)),
            sent: StdMutex::new(Vec::new()),
        }
    }

    /// All frames written on this end so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().expect("sent lock poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.lock().expect("outbox lock poisoned").is_none()
    }
}

#[async_trait]
impl MsgReadWriter for NullTransport {
    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    async fn read_frame(&self) -> Result<Vec<u8>, NetworkError> {
        self.inbox.lock().await.recv().await.ok_or(NetworkError::Closed)
    }

    async fn write_frame(&self, payload: &[u8]) -> Result<(), NetworkError> {
        let outbox = self.outbox.lock().expect("outbox lock poisoned");
        let tx = outbox.as_ref().ok_or(NetworkError::Closed)?;
        tx.send(payload.to_vec()).map_err(|_| NetworkError::Closed)?;
        self.sent
            .lock()
            .expect("sent lock poisoned")
            .push(payload.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.outbox.lock().expect("outbox lock poisoned").take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_the_pair() {
        let (a, b) = NullTransport::pair("a", "b");
        assert_eq!(a.remote_id(), "b");
        assert_eq!(b.remote_id(), "a");

        a.write_frame(b"hello").await.unwrap();
        assert_eq!(b.read_frame().await.unwrap(), b"hello");
        assert_eq!(a.sent(), vec![b"hello".to_vec()]);
        assert!(b.sent().is_empty());
    }

    #[tokio::test]
    async fn close_drains_then_reports_closed() {
        let (a, b) = NullTransport::pair("a", "b");
        a.write_frame(b"last").await.unwrap();
        a.close().await;
        a.close().await;

        assert!(a.is_closed());
        assert!(matches!(a.write_frame(b"x").await, Err(NetworkError::Closed)));
        assert_eq!(b.read_frame().await.unwrap(), b"last");
        assert!(matches!(b.read_frame().await, Err(NetworkError::Closed)));
    }

    #[tokio::test]
    async fn dropped_remote_fails_writes() {
        let (a, b) = NullTransport::pair("a", "b");
        drop(b);
        assert!(matches!(a.write_frame(b"x").await, Err(NetworkError::Closed)));
        assert!(matches!(a.read_frame().await, Err(NetworkError::Closed)));
    }
}
