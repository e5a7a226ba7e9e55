//! roomdrop wire format: the messages two peers exchange and the frame
//! that carries them over a byte stream.
//!
//! Messages are JSON objects discriminated by a `type` field. The field names
//! are camelCase so a browser peer speaking the same vocabulary can read them.
//! Binary payloads travel as standard padded base64 text.
//!
//! A frame is a 4-byte big-endian body length followed by the JSON body.
//! Frames longer than [`MAX_FRAME_LEN`] are refused in both directions.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Largest frame body either side will write or accept.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Length prefix size.
pub const FRAME_HEADER_LEN: usize = 4;

/// Opaque token naming one transfer within a connection's lifetime.
pub type TransferId = String;

/// Generate a locally unique transfer id: unix millis plus a random suffix.
pub fn new_transfer_id() -> TransferId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: [u8; 5] = rand::random();
    format!("{millis}-{}", hex::encode(suffix))
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Announces a chunked transfer. Sent once, before any of its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub transfer_id: TransferId,
    pub file_name: String,
    /// Declared byte size of the whole file.
    pub file_size: u64,
    /// Declared content type. May be empty.
    pub file_type: String,
    pub total_chunks: u32,
}

/// One slice of a chunked transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub transfer_id: TransferId,
    /// 0-based position of this slice.
    pub index: u32,
    #[serde(with = "base64_bytes")]
    pub payload: Bytes,
}

/// Terminal message of a chunked transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndOfTransfer {
    pub transfer_id: TransferId,
    pub original_size: u64,
}

/// Self-contained whole-file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WholeFile {
    pub transfer_id: TransferId,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    /// Base64 text of the file bytes.
    pub data: String,
    /// Additive 16-bit checksum of the decoded bytes, when the sender declared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u16>,
}

/// Every message that travels over a peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// The sender's display name. Sent by both sides after connecting.
    #[serde(rename = "nickname", rename_all = "camelCase")]
    Nickname {
        #[serde(alias = "nickname")]
        display_name: String,
    },

    /// First message from a joining peer: the room it expects to reach.
    #[serde(rename = "join", rename_all = "camelCase")]
    Join { room_code: String },

    #[serde(rename = "file-start")]
    Descriptor(Descriptor),

    #[serde(rename = "file-chunk")]
    Chunk(Chunk),

    #[serde(rename = "file-end")]
    End(EndOfTransfer),

    #[serde(rename = "file-transfer")]
    WholeFile(WholeFile),
}

impl WireMessage {
    /// Wire tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nickname { .. } => "nickname",
            Self::Join { .. } => "join",
            Self::Descriptor(_) => "file-start",
            Self::Chunk(_) => "file-chunk",
            Self::End(_) => "file-end",
            Self::WholeFile(_) => "file-transfer",
        }
    }

    /// The transfer this message belongs to, if it is a transfer message.
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            Self::Descriptor(d) => Some(&d.transfer_id),
            Self::Chunk(c) => Some(&c.transfer_id),
            Self::End(e) => Some(&e.transfer_id),
            Self::WholeFile(w) => Some(&w.transfer_id),
            Self::Nickname { .. } | Self::Join { .. } => None,
        }
    }
}

// ── Payload text encoding ─────────────────────────────────────────────────────

/// Encode bytes as standard padded base64.
pub fn encode_data(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard padded base64.
pub fn decode_data(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text.as_bytes())
}

/// Length of the base64 text for `len` input bytes.
pub fn encoded_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}

mod base64_bytes {
    use super::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

// ── Framing ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialize a message into a complete frame (length prefix + body).
pub fn encode_frame(message: &WireMessage) -> Result<Vec<u8>, WireError> {
    let body = serde_json::to_vec(message)?;
    check_frame_len(body.len())?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parse a frame body (without its length prefix).
pub fn decode_body(body: &[u8]) -> Result<WireMessage, WireError> {
    Ok(serde_json::from_slice(body)?)
}

/// Reject a declared body length before anything is allocated for it.
pub fn check_frame_len(len: usize) -> Result<usize, WireError> {
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            len,
            limit: MAX_FRAME_LEN,
        });
    }
    Ok(len)
}
