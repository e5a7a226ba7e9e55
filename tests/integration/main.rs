//! roomdrop integration test harness.
//!
//! Tests run a real host on a loopback TCP listener inside the test process
//! and drive it with joining connections:
//!
//!   cargo test --test integration
//!
//! Each test gets its own download directory and listener port.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use roomdrop_core::{RoomCode, WireMessage};
use roomdrop_services::session::join_room;
use roomdrop_services::{
    DownloadDir, Host, HostEvent, PeerConnection, PeerSession, SendMode, SessionEvent,
    TransferEncoder, TransferError,
};

mod failures;
mod sessions;
mod transfers;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long a test waits for any single host event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fresh, empty directory under the system temp dir.
pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("roomdrop-it-{tag}-{}", std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    dir
}

/// Deterministic, non-repeating-looking test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 251) as u8).collect()
}

/// Encoder without pacing so tests stay fast.
pub fn encoder(mode: SendMode) -> TransferEncoder {
    TransferEncoder::new(mode, Duration::ZERO)
}

/// A host running on 127.0.0.1 with an ephemeral port.
pub struct TestHost {
    pub addr: std::net::SocketAddr,
    pub room: RoomCode,
    pub downloads: PathBuf,
    events: mpsc::UnboundedReceiver<HostEvent>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl TestHost {
    pub async fn start(tag: &str) -> Result<Self> {
        let downloads = temp_dir(tag);
        let room = RoomCode::generate();
        let (events_tx, events) = mpsc::unbounded_channel();
        let host = Host::bind("127.0.0.1:0", room.clone(), "Host", DownloadDir::new(&downloads))
            .await?
            .with_events(events_tx);
        let addr = host.local_addr()?;
        let (shutdown, _) = broadcast::channel(1);
        let task = tokio::spawn(host.run(shutdown.subscribe()));
        Ok(Self {
            addr,
            room,
            downloads,
            events,
            shutdown,
            task,
        })
    }

    pub async fn next_event(&mut self) -> Result<HostEvent> {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .context("timed out waiting for host event")?
            .context("host stopped")
    }

    /// Skip events until a file is saved. A rejected transfer is an error.
    pub async fn wait_saved(&mut self) -> Result<PathBuf> {
        loop {
            match self.next_event().await? {
                HostEvent::Session(SessionEvent::Saved { path, .. }) => return Ok(path),
                HostEvent::Session(SessionEvent::Rejected(e)) => bail!("transfer rejected: {e}"),
                _ => {}
            }
        }
    }

    /// Skip events until a transfer is rejected.
    pub async fn wait_rejected(&mut self) -> Result<TransferError> {
        loop {
            match self.next_event().await? {
                HostEvent::Session(SessionEvent::Rejected(e)) => return Ok(e),
                HostEvent::Session(SessionEvent::Saved { path, .. }) => {
                    bail!("unexpected delivery of {}", path.display())
                }
                _ => {}
            }
        }
    }

    /// Skip events until the current peer is dropped. Returns discarded transfers.
    pub async fn wait_disconnected(&mut self) -> Result<usize> {
        loop {
            if let HostEvent::Disconnected { dropped } = self.next_event().await? {
                return Ok(dropped);
            }
        }
    }

    pub async fn stop(self) -> Result<()> {
        self.shutdown.send(()).ok();
        self.task.await.context("host task panicked")??;
        std::fs::remove_dir_all(&self.downloads).ok();
        Ok(())
    }
}

/// Connect and complete the join handshake by hand, for tests that speak
/// raw wire messages.
pub async fn raw_join(host: &TestHost) -> Result<PeerConnection> {
    let mut conn = PeerConnection::connect(host.addr).await?;
    join_room(&conn, &host.room, "Raw").await?;
    match conn.recv().await {
        Some(WireMessage::Nickname { .. }) => Ok(conn),
        other => bail!("expected host nickname, got {other:?}"),
    }
}

/// Receive-side session for a joining peer.
pub fn joiner_session(tag: &str) -> PeerSession {
    PeerSession::new(DownloadDir::new(temp_dir(tag)))
}
