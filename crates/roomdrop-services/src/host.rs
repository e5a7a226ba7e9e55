//! Hosting side: accept peers into a room and receive their files.
//!
//! At most one peer is served at a time. A newly admitted peer replaces the
//! current one, whose connection is closed and whose reassembly state is
//! discarded.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};

use roomdrop_core::{RoomCode, WireMessage};

use crate::delivery::DownloadDir;
use crate::session::{admit, PeerSession, SessionEvent};
use crate::transport::PeerConnection;

/// Observable host activity, mostly for tests and the CLI.
#[derive(Debug)]
pub enum HostEvent {
    Connected { peer: String },
    Session(SessionEvent),
    /// A verified file could not be written to the download directory.
    SaveFailed(anyhow::Error),
    Disconnected { dropped: usize },
}

pub struct Host {
    listener: TcpListener,
    room: RoomCode,
    nickname: String,
    session: PeerSession,
    events: Option<mpsc::UnboundedSender<HostEvent>>,
}

impl Host {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        room: RoomCode,
        nickname: impl Into<String>,
        downloads: DownloadDir,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("failed to bind listener")?;
        Ok(Self {
            listener,
            room,
            nickname: nickname.into(),
            session: PeerSession::new(downloads),
            events: None,
        })
    }

    /// Report activity on `tx` as well as in the log.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<HostEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    pub fn room(&self) -> &RoomCode {
        &self.room
    }

    /// Serve until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let (admitted_tx, mut admitted_rx) = mpsc::channel::<PeerConnection>(4);
        let mut current: Option<PeerConnection> = None;

        tracing::info!(room = %self.room, addr = ?self.listener.local_addr().ok(), "hosting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("host shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(error = %e, "set_nodelay failed");
                    }
                    let conn = PeerConnection::spawn(stream, addr.to_string());
                    tokio::spawn(admission(
                        conn,
                        self.room.clone(),
                        self.nickname.clone(),
                        admitted_tx.clone(),
                    ));
                }
                Some(conn) = admitted_rx.recv() => {
                    if let Some(old) = current.take() {
                        tracing::info!(old = %old.peer(), new = %conn.peer(), "new peer replaces current one");
                        self.drop_peer(old).await;
                    }
                    tracing::info!(peer = %conn.peer(), "peer joined");
                    self.session.connected(conn.peer());
                    self.emit(HostEvent::Connected { peer: conn.peer().to_string() });
                    current = Some(conn);
                }
                message = next_message(&mut current) => match message {
                    Some(message) => match self.session.handle_message(message).await {
                        Ok(SessionEvent::Idle) => {}
                        Ok(event) => self.emit(HostEvent::Session(event)),
                        Err(e) => {
                            tracing::warn!(error = %e, "delivery failed");
                            self.emit(HostEvent::SaveFailed(e));
                        }
                    },
                    None => {
                        if let Some(old) = current.take() {
                            self.drop_peer(old).await;
                        }
                    }
                },
            }
        }

        if let Some(old) = current.take() {
            self.drop_peer(old).await;
        }
        Ok(())
    }

    async fn drop_peer(&mut self, conn: PeerConnection) {
        let dropped = self.session.disconnect();
        conn.close().await;
        self.emit(HostEvent::Disconnected { dropped });
    }

    fn emit(&self, event: HostEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

async fn admission(
    mut conn: PeerConnection,
    room: RoomCode,
    nickname: String,
    admitted: mpsc::Sender<PeerConnection>,
) {
    match admit(&mut conn, &room, &nickname).await {
        Ok(()) => {
            if let Err(mpsc::error::SendError(conn)) = admitted.send(conn).await {
                conn.close().await;
            }
        }
        Err(e) => {
            tracing::warn!(peer = %conn.peer(), error = %e, "join refused");
            conn.close().await;
        }
    }
}

/// Next message from the current peer; pending forever when there is none.
async fn next_message(current: &mut Option<PeerConnection>) -> Option<WireMessage> {
    match current {
        Some(conn) => conn.recv().await,
        None => std::future::pending().await,
    }
}
