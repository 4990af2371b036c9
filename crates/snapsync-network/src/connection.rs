//! Framed message connections
//!
//! A frame is a 4-byte big-endian length followed by that many bytes of an
//! encoded [`ProtocolMessage`].

use crate::protocol::{ProtocolMessage, MAX_FRAME_SIZE};
use snapsync_types::{Error, Result};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Connection identifier
pub type ConnectionId = uuid::Uuid;

/// Network connection trait
#[async_trait::async_trait]
pub trait NetworkConnection: Send + Sync {
    /// Send a message
    async fn send(&mut self, message: &ProtocolMessage) -> Result<()>;

    /// Receive a message, `None` once the other side closed cleanly
    async fn receive(&mut self) -> Result<Option<ProtocolMessage>>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;

    /// Get connection info
    fn info(&self) -> &ConnectionInfo;
}

/// Connection information
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// Remote address
    pub remote_addr: SocketAddr,
    /// Local address
    pub local_addr: SocketAddr,
    /// Connection established time
    pub established_at: Instant,
    /// Last activity time
    pub last_activity: Instant,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

impl ConnectionInfo {
    /// Create new connection info
    pub fn new(remote_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id: uuid::Uuid::new_v4(),
            remote_addr,
            local_addr,
            established_at: now,
            last_activity: now,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Add sent bytes
    pub fn add_sent_bytes(&mut self, bytes: u64) {
        self.bytes_sent += bytes;
        self.last_activity = Instant::now();
    }

    /// Add received bytes
    pub fn add_received_bytes(&mut self, bytes: u64) {
        self.bytes_received += bytes;
        self.last_activity = Instant::now();
    }

    /// Get connection age
    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }

    /// Get idle time
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Write one frame, returning the number of bytes put on the wire
pub async fn write_frame<W>(writer: &mut W, message: &ProtocolMessage) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let data = message.to_bytes()?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(Error::protocol(format!(
            "Message of {} bytes exceeds the {} byte limit",
            data.len(),
            MAX_FRAME_SIZE
        )));
    }

    let len = u32::try_from(data.len())
        .map_err(|_| Error::protocol("Message length does not fit in a frame"))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;

    Ok(4 + data.len() as u64)
}

/// Read one frame, `None` on a clean end of stream before the length prefix
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(ProtocolMessage, u64)>>
where
    R: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let message_len = u32::from_be_bytes(len_buf) as usize;
    if message_len > MAX_FRAME_SIZE {
        return Err(Error::protocol(format!(
            "Frame of {} bytes exceeds the {} byte limit",
            message_len, MAX_FRAME_SIZE
        )));
    }

    let mut message_buf = vec![0u8; message_len];
    reader.read_exact(&mut message_buf).await?;

    let message = ProtocolMessage::from_bytes(&message_buf)?;
    Ok(Some((message, 4 + message_len as u64)))
}

/// Framed connection over TCP
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    info: ConnectionInfo,
}

impl TcpConnection {
    /// Wrap an established stream
    pub fn new(stream: TcpStream) -> Result<Self> {
        let info = ConnectionInfo::new(stream.peer_addr()?, stream.local_addr()?);
        debug!(
            "Connection {} established: {} -> {}",
            info.id, info.local_addr, info.remote_addr
        );
        Ok(Self { stream, info })
    }
}

#[async_trait::async_trait]
impl NetworkConnection for TcpConnection {
    async fn send(&mut self, message: &ProtocolMessage) -> Result<()> {
        let written = write_frame(&mut self.stream, message).await?;
        self.info.add_sent_bytes(written);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<ProtocolMessage>> {
        match read_frame(&mut self.stream).await? {
            Some((message, read)) => {
                self.info.add_received_bytes(read);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        debug!(
            "Connection {} closed after {:?} ({} bytes out, {} bytes in)",
            self.info.id,
            self.info.age(),
            self.info.bytes_sent,
            self.info.bytes_received
        );
        Ok(())
    }

    fn info(&self) -> &ConnectionInfo {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use snapsync_types::ErrorKind;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let message = ProtocolMessage::new(MessageType::Heartbeat, b"ping".to_vec());

        let written = write_frame(&mut a, &message).await.unwrap();
        let (received, read) = read_frame(&mut b).await.unwrap().unwrap();

        assert_eq!(received, message);
        assert_eq!(written, read);
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = u32::try_from(MAX_FRAME_SIZE + 1).unwrap();
        a.write_all(&len.to_be_bytes()).await.unwrap();

        let error = read_frame(&mut b).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&16u32.to_be_bytes()).await.unwrap();
        a.write_all(b"short").await.unwrap();
        drop(a);

        let error = read_frame(&mut b).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn test_tcp_connection_roundtrip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut connection = TcpConnection::new(stream).unwrap();
            let message = connection.receive().await.unwrap().unwrap();
            connection.send(&message).await.unwrap();
        });

        let mut client = TcpConnection::new(TcpStream::connect(addr).await.unwrap()).unwrap();
        let message = ProtocolMessage::new(MessageType::Heartbeat, b"echo".to_vec());
        client.send(&message).await.unwrap();

        let echoed = client.receive().await.unwrap().unwrap();
        assert_eq!(echoed.payload, b"echo");
        assert!(client.info().bytes_sent > 0);
        assert_eq!(client.info().bytes_sent, client.info().bytes_received);

        server.await.unwrap();
    }
}
