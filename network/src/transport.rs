//! Message transports: length-prefixed frames over any async byte stream.

use async_trait::async_trait;
use dsync_protocol::codec::{frame_body_len, FRAME_HEADER_LEN};
use dsync_protocol::MAX_MESSAGE_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::NetworkError;

/// A bidirectional stream of opaque frames to one remote node.
///
/// Reads and writes may run concurrently; concurrent writers are serialized.
#[async_trait]
pub trait MsgReadWriter: Send + Sync {
    /// Stable identifier of the remote end.
    fn remote_id(&self) -> &str;

    /// Next frame. [`NetworkError::Closed`] on clean end of stream.
    async fn read_frame(&self) -> Result<Vec<u8>, NetworkError>;

    async fn write_frame(&self, payload: &[u8]) -> Result<(), NetworkError>;

    /// Shut the write side down. Idempotent.
    async fn close(&self);
}

/// Frames carried as a 4-byte big-endian length followed by the payload.
pub struct FramedTransport<R, W> {
    remote_id: String,
    reader: Mutex<R>,
    writer: Mutex<W>,
    max_frame: usize,
}

pub type TcpTransport = FramedTransport<OwnedReadHalf, OwnedWriteHalf>;

impl<R, W> FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(remote_id: impl Into<String>, reader: R, writer: W) -> Self {
        Self {
            remote_id: remote_id.into(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            max_frame: MAX_MESSAGE_SIZE,
        }
    }

    /// Lower the largest accepted frame below [`MAX_MESSAGE_SIZE`].
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame.min(MAX_MESSAGE_SIZE);
        self
    }
}

impl TcpTransport {
    /// Wrap an accepted or connected stream. The remote socket address
    /// becomes the peer id.
    pub fn from_stream(stream: TcpStream) -> Result<Self, NetworkError> {
        let remote = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(remote.to_string(), reader, writer))
    }

    pub async fn connect(addr: &str) -> Result<Self, NetworkError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{addr}: {e}")))?;
        Self::from_stream(stream)
    }
}

#[async_trait]
impl<R, W> MsgReadWriter for FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    async fn read_frame(&self) -> Result<Vec<u8>, NetworkError> {
        let mut reader = self.reader.lock().await;
        let mut header = [0u8; FRAME_HEADER_LEN];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(NetworkError::Closed)
            }
            Err(e) => return Err(e.into()),
        }
        let len = frame_body_len(header, self.max_frame)?;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Ok(body)
    }

    async fn write_frame(&self, payload: &[u8]) -> Result<(), NetworkError> {
        if payload.len() > self.max_frame {
            return Err(dsync_protocol::ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: self.max_frame,
            }
            .into());
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::trace!(peer = %self.remote_id, error = %e, "transport shutdown failed");
        }
    }
}
