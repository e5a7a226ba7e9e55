//! Peer session: one connection's receive-side state.
//!
//! The session owns its decoder outright; the loop driving it is the only
//! code touching transfer state, so nothing here is locked.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use roomdrop_core::{RoomCode, TransferId, WireMessage};

use crate::decoder::{DecodeOutcome, TransferDecoder, TransferError};
use crate::delivery::DownloadDir;
use crate::transport::PeerConnection;

/// Connection state of the local instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected {
        peer: String,
        display_name: Option<String>,
    },
}

/// What handling one incoming message produced.
#[derive(Debug)]
pub enum SessionEvent {
    /// Nothing worth reporting.
    Idle,
    PeerNamed(String),
    Started {
        transfer_id: TransferId,
        total_chunks: u32,
    },
    Progress {
        transfer_id: TransferId,
        percent: u8,
    },
    Saved {
        transfer_id: TransferId,
        path: PathBuf,
    },
    /// A transfer failed verification and was dropped.
    Rejected(TransferError),
}

pub struct PeerSession {
    state: SessionState,
    decoder: TransferDecoder,
    downloads: DownloadDir,
}

impl PeerSession {
    pub fn new(downloads: DownloadDir) -> Self {
        Self {
            state: SessionState::Idle,
            decoder: TransferDecoder::new(),
            downloads,
        }
    }

    /// Start tracking a new peer. Any previous peer's state is discarded.
    pub fn connected(&mut self, peer: impl Into<String>) {
        self.disconnect();
        self.state = SessionState::Connected {
            peer: peer.into(),
            display_name: None,
        };
    }

    /// Tear down the current peer: drop every reassembly buffer.
    /// Returns how many in-flight transfers were discarded.
    pub fn disconnect(&mut self) -> usize {
        let dropped = self.decoder.clear();
        if let SessionState::Connected { peer, .. } = &self.state {
            tracing::info!(%peer, dropped, "peer disconnected");
        }
        self.state = SessionState::Idle;
        dropped
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn peer_name(&self) -> Option<&str> {
        match &self.state {
            SessionState::Connected {
                display_name: Some(name),
                ..
            } => Some(name),
            _ => None,
        }
    }

    pub fn decoder(&self) -> &TransferDecoder {
        &self.decoder
    }

    pub fn downloads(&self) -> &DownloadDir {
        &self.downloads
    }

    /// Apply one message from the peer.
    ///
    /// Integrity failures come back as [`SessionEvent::Rejected`]; only a
    /// failure to write a verified file to disk is an error.
    pub async fn handle_message(&mut self, message: WireMessage) -> Result<SessionEvent> {
        match message {
            WireMessage::Nickname { display_name } => {
                tracing::info!(name = %display_name, "peer named");
                if let SessionState::Connected {
                    display_name: slot, ..
                } = &mut self.state
                {
                    *slot = Some(display_name.clone());
                }
                Ok(SessionEvent::PeerNamed(display_name))
            }
            WireMessage::Join { .. } => {
                tracing::debug!("join after handshake, ignoring");
                Ok(SessionEvent::Idle)
            }
            transfer => self.handle_transfer(transfer).await,
        }
    }

    async fn handle_transfer(&mut self, message: WireMessage) -> Result<SessionEvent> {
        let outcome = match self.decoder.handle(message) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(transfer_id = %e.transfer_id(), error = %e, "transfer rejected");
                return Ok(SessionEvent::Rejected(e));
            }
        };

        match outcome {
            DecodeOutcome::Started {
                transfer_id,
                total_chunks,
            } => Ok(SessionEvent::Started {
                transfer_id,
                total_chunks,
            }),
            DecodeOutcome::Progress {
                transfer_id,
                percent,
                ..
            } => Ok(SessionEvent::Progress {
                transfer_id,
                percent,
            }),
            DecodeOutcome::Ignored(_) => Ok(SessionEvent::Idle),
            DecodeOutcome::Delivered(file) => {
                let path = self
                    .downloads
                    .save(&file)
                    .await
                    .with_context(|| format!("failed to save {}", file.name))?;
                Ok(SessionEvent::Saved {
                    transfer_id: file.transfer_id,
                    path,
                })
            }
        }
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Joining side: announce the room code, then our name.
pub async fn join_room(conn: &PeerConnection, room: &RoomCode, nickname: &str) -> Result<()> {
    conn.send(WireMessage::Join {
        room_code: room.as_str().to_string(),
    })
    .await
    .context("failed to send join")?;
    conn.send(WireMessage::Nickname {
        display_name: nickname.to_string(),
    })
    .await
    .context("failed to send nickname")?;
    tracing::info!(peer = %conn.peer(), room = %room, "join sent");
    Ok(())
}

/// Hosting side: the first message must be a `join` naming our room.
/// On success our name is sent back.
pub async fn admit(conn: &mut PeerConnection, room: &RoomCode, nickname: &str) -> Result<()> {
    match conn.recv().await {
        Some(WireMessage::Join { room_code }) if room.matches(&room_code) => {}
        Some(WireMessage::Join { room_code }) => {
            bail!("room code mismatch: peer asked for {room_code:?}")
        }
        Some(other) => bail!("expected join, got {}", other.kind()),
        None => bail!("peer closed before joining"),
    }
    conn.send(WireMessage::Nickname {
        display_name: nickname.to_string(),
    })
    .await
    .context("failed to send nickname")?;
    Ok(())
}
