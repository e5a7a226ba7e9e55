//! Joining side: enter a host's room and send it files.

use anyhow::{bail, Result};

use roomdrop_core::{RoomCode, WireMessage};

use crate::encoder::{LocalFile, SendError, SendOutcome, TransferEncoder};
use crate::session::{join_room, PeerSession, SessionEvent};
use crate::transport::PeerConnection;

/// Result of sending one file.
#[derive(Debug)]
pub struct FileReport {
    pub name: String,
    pub outcome: Result<SendOutcome, SendError>,
}

/// Join `room` over `conn`, send every file in order, then close.
///
/// Messages from the host are handled by `session` while sending. Files
/// that fail individually are reported; a closed connection ends the run.
pub async fn join_and_send(
    mut conn: PeerConnection,
    room: &RoomCode,
    nickname: &str,
    encoder: &TransferEncoder,
    files: &[LocalFile],
    session: &mut PeerSession,
) -> Result<Vec<FileReport>> {
    join_room(&conn, room, nickname).await?;
    session.connected(conn.peer());

    // The host answers with its name only once the room code checked out.
    match conn.recv().await {
        Some(message @ WireMessage::Nickname { .. }) => {
            session.handle_message(message).await?;
        }
        Some(other) => bail!("unexpected {} before the host's welcome", other.kind()),
        None => bail!("host closed the connection; wrong room code?"),
    }

    let tx = conn.sender();
    let sending = async move {
        let mut reports = Vec::with_capacity(files.len());
        for file in files {
            let outcome = encoder.send_file(file, &tx).await;
            let closed = matches!(outcome, Err(SendError::ChannelClosed));
            match &outcome {
                Ok(SendOutcome::Sent { transfer_id, chunks }) => {
                    tracing::info!(file = %file.name, %transfer_id, ?chunks, "file queued");
                }
                Ok(SendOutcome::Suppressed) => {}
                Err(e) => tracing::warn!(file = %file.name, error = %e, "send failed"),
            }
            reports.push(FileReport {
                name: file.name.clone(),
                outcome,
            });
            if closed {
                break;
            }
        }
        reports
    };
    tokio::pin!(sending);

    let reports = loop {
        tokio::select! {
            reports = &mut sending => break reports,
            message = conn.recv() => match message {
                Some(message) => {
                    if let SessionEvent::Rejected(e) = session.handle_message(message).await? {
                        tracing::warn!(error = %e, "incoming transfer rejected");
                    }
                }
                None => {
                    session.disconnect();
                    bail!("host closed the connection");
                }
            },
        }
    };

    conn.close().await;
    session.disconnect();
    Ok(reports)
}
