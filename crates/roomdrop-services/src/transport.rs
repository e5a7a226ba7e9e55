//! Peer connection: a reliable, ordered message channel over a byte stream.
//!
//! Each connection runs a reader task and a writer task. The session side
//! only sees two channels: a bounded outgoing queue and an incoming queue
//! that yields `None` once the peer is gone (clean close, I/O error, or a
//! malformed frame).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use roomdrop_core::wire::{check_frame_len, decode_body, encode_frame, WireError, FRAME_HEADER_LEN};
use roomdrop_core::WireMessage;

/// Outgoing messages buffered before senders wait on the writer.
pub const OUTGOING_QUEUE: usize = 64;
const INCOMING_QUEUE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("connection closed")]
    Closed,
}

/// One open peer connection.
pub struct PeerConnection {
    peer: String,
    outgoing: mpsc::Sender<WireMessage>,
    incoming: mpsc::Receiver<WireMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl PeerConnection {
    /// Start reader and writer tasks over `stream`.
    pub fn spawn<S>(stream: S, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = peer.into();
        let (read_half, write_half) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::channel(OUTGOING_QUEUE);
        let (in_tx, in_rx) = mpsc::channel(INCOMING_QUEUE);

        let reader = tokio::spawn(read_loop(read_half, in_tx, peer.clone()));
        let writer = tokio::spawn(write_loop(write_half, out_rx, peer.clone()));

        Self {
            peer,
            outgoing: out_tx,
            incoming: in_rx,
            reader,
            writer,
        }
    }

    /// Open a TCP connection to a host.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?.to_string();
        tracing::info!(%peer, "connected");
        Ok(Self::spawn(stream, peer))
    }

    /// Two connected endpoints over an in-memory pipe.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(256 * 1024);
        (Self::spawn(a, "pipe-a"), Self::spawn(b, "pipe-b"))
    }

    /// Remote identifier (socket address or pipe name).
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// A handle for queueing messages, e.g. for the encoder.
    pub fn sender(&self) -> mpsc::Sender<WireMessage> {
        self.outgoing.clone()
    }

    pub async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        self.outgoing
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Next message from the peer, or `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.incoming.recv().await
    }

    /// Flush queued messages, shut down the write side, and stop reading.
    ///
    /// Senders obtained from [`sender`](Self::sender) must be dropped first,
    /// otherwise the writer keeps waiting for more messages.
    pub async fn close(self) {
        drop(self.outgoing);
        if let Err(e) = self.writer.await {
            tracing::debug!(peer = %self.peer, error = %e, "writer task ended abnormally");
        }
        self.reader.abort();
        tracing::debug!(peer = %self.peer, "connection closed");
    }
}

async fn read_loop<R>(mut reader: R, tx: mpsc::Sender<WireMessage>, peer: String)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(message)) => {
                tracing::trace!(%peer, kind = message.kind(), "message received");
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!(%peer, "peer closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "dropping connection");
                break;
            }
        }
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<WireMessage>, peer: String)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &message).await {
            // Nothing after a lost frame is sent.
            tracing::warn!(%peer, kind = message.kind(), error = %e, "send failed, closing connection");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Read one frame. `Ok(None)` means the peer closed between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<WireMessage>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = check_frame_len(u32::from_be_bytes(header) as usize)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(decode_body(&body)?))
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, message: &WireMessage) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
