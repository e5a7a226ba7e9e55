//! Transfer encoder: turns a local file into wire messages.
//!
//! Small files go out as one self-contained `file-transfer` message carrying
//! base64 data and an additive checksum. Large files are split into fixed-size
//! chunks framed by `file-start` / `file-end`, read one chunk at a time so the
//! whole file is never held in memory. Chunk sends are separated by a fixed
//! pacing delay.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;

use roomdrop_core::config::{RoomdropConfig, TransferMode, MAX_CHUNK_SIZE};
use roomdrop_core::wire::{encode_data, encoded_len, new_transfer_id, MAX_FRAME_LEN};
use roomdrop_core::{additive16, Chunk, Descriptor, EndOfTransfer, TransferId, WholeFile, WireMessage};

use crate::decoder::DEFAULT_CONTENT_TYPE;
use crate::reassembly::progress_percent;

/// Room left in a whole-file frame for everything except the data field.
const ENVELOPE_SLACK: usize = 1024;

/// How the encoder picks between whole-file and chunked transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    WholeFile,
    Chunked { chunk_size: usize },
    Auto { chunk_size: usize, whole_file_max: u64 },
}

impl SendMode {
    pub fn from_config(config: &RoomdropConfig) -> Self {
        let chunk_size = config.effective_chunk_size();
        match config.transfer.mode {
            TransferMode::WholeFile => Self::WholeFile,
            TransferMode::Chunked => Self::Chunked { chunk_size },
            TransferMode::Auto => Self::Auto {
                chunk_size,
                whole_file_max: config.transfer.whole_file_max_bytes,
            },
        }
    }

    /// Chunk size to use for a file of `size` bytes, or None for whole-file.
    pub fn chunk_size_for(&self, size: u64) -> Option<usize> {
        match *self {
            Self::WholeFile => None,
            Self::Chunked { chunk_size } => Some(chunk_size.max(1)),
            Self::Auto {
                chunk_size,
                whole_file_max,
            } => (size > whole_file_max).then_some(chunk_size.max(1)),
        }
    }
}

// ── Files ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum FileBody {
    Disk(PathBuf),
    Memory(Bytes),
}

/// A file the user asked to send.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    /// Last modification time, unix millis.
    pub modified: Option<u64>,
    body: FileBody,
}

/// Identity used by the duplicate-send guard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SendKey {
    pub name: String,
    pub size: u64,
    pub modified: Option<u64>,
}

impl LocalFile {
    /// Describe a file on disk. Content type is guessed from the extension.
    pub async fn open(path: &Path) -> Result<Self, SendError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| SendError::Read(path.to_path_buf(), e))?;
        if !meta.is_file() {
            return Err(SendError::NotAFile(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let content_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);

        Ok(Self {
            name,
            size: meta.len(),
            content_type,
            modified,
            body: FileBody::Disk(path.to_path_buf()),
        })
    }

    /// An in-memory file.
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            content_type: content_type.into(),
            modified: None,
            body: FileBody::Memory(data),
        }
    }

    pub fn send_key(&self) -> SendKey {
        SendKey {
            name: self.name.clone(),
            size: self.size,
            modified: self.modified,
        }
    }

    async fn read_all(&self) -> Result<Bytes, SendError> {
        match &self.body {
            FileBody::Memory(data) => Ok(data.clone()),
            FileBody::Disk(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| SendError::Read(path.clone(), e)),
        }
    }

    async fn chunk_reader(&self) -> Result<ChunkReader, SendError> {
        match &self.body {
            FileBody::Memory(data) => Ok(ChunkReader::Memory(data.clone())),
            FileBody::Disk(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| SendError::Read(path.clone(), e))?;
                Ok(ChunkReader::Disk {
                    path: path.clone(),
                    file,
                })
            }
        }
    }
}

enum ChunkReader {
    Disk { path: PathBuf, file: tokio::fs::File },
    Memory(Bytes),
}

impl ChunkReader {
    async fn read(&mut self, offset: u64, len: usize) -> Result<Bytes, SendError> {
        match self {
            Self::Memory(data) => {
                let start = offset as usize;
                data.get(start..start + len)
                    .map(|_| data.slice(start..start + len))
                    .ok_or_else(|| {
                        SendError::Read(
                            PathBuf::from("<memory>"),
                            std::io::ErrorKind::UnexpectedEof.into(),
                        )
                    })
            }
            Self::Disk { path, file } => {
                let mut buf = vec![0u8; len];
                let result = async {
                    file.seek(SeekFrom::Start(offset)).await?;
                    file.read_exact(&mut buf).await?;
                    Ok::<_, std::io::Error>(())
                }
                .await;
                result.map_err(|e| SendError::Read(path.clone(), e))?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

// ── Chunk plan ────────────────────────────────────────────────────────────────

/// Byte ranges of a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub size: u64,
    pub chunk_size: usize,
    pub total_chunks: u32,
}

impl ChunkPlan {
    /// `total_chunks = ceil(size / chunk_size)`, with `chunk_size` capped so
    /// every chunk frame fits under the frame limit.
    pub fn new(size: u64, chunk_size: usize) -> Result<Self, SendError> {
        let chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        let total_chunks = u32::try_from(size.div_ceil(chunk_size as u64))
            .map_err(|_| SendError::TooManyChunks { size, chunk_size })?;
        Ok(Self {
            size,
            chunk_size,
            total_chunks,
        })
    }

    /// Offset and length of chunk `index`. Every chunk is full except the last.
    pub fn range(&self, index: u32) -> (u64, usize) {
        let offset = u64::from(index) * self.chunk_size as u64;
        let len = (self.size - offset).min(self.chunk_size as u64) as usize;
        (offset, len)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),
    #[error("{name} ({size} bytes) is too large to send as a single message")]
    FileTooLarge { name: String, size: u64 },
    #[error("{size} bytes in {chunk_size}-byte chunks exceeds the chunk index range")]
    TooManyChunks { size: u64, chunk_size: usize },
    #[error("peer connection closed")]
    ChannelClosed,
}

/// What `send_file` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// All messages were queued. `chunks` is None for a whole-file send.
    Sent {
        transfer_id: TransferId,
        chunks: Option<u32>,
    },
    /// An identical file is already being sent; nothing was queued.
    Suppressed,
}

// ── Encoder ───────────────────────────────────────────────────────────────────

/// Sends files over a connection's outgoing queue.
///
/// Clones share the in-flight table, so a duplicate request made through
/// any clone is suppressed while the first send runs.
#[derive(Clone)]
pub struct TransferEncoder {
    mode: SendMode,
    pacing: Duration,
    in_flight: Arc<DashMap<SendKey, TransferId>>,
}

impl TransferEncoder {
    pub fn new(mode: SendMode, pacing: Duration) -> Self {
        Self {
            mode,
            pacing,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn from_config(config: &RoomdropConfig) -> Self {
        Self::new(
            SendMode::from_config(config),
            Duration::from_millis(config.transfer.pacing_ms),
        )
    }

    pub fn mode(&self) -> SendMode {
        self.mode
    }

    /// Number of sends currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, key: &SendKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Queue every message for `file` on `tx`, in order.
    pub async fn send_file(
        &self,
        file: &LocalFile,
        tx: &mpsc::Sender<WireMessage>,
    ) -> Result<SendOutcome, SendError> {
        let transfer_id = new_transfer_id();
        let Some(_guard) = self.claim(file.send_key(), &transfer_id) else {
            tracing::debug!(file = %file.name, size = file.size, "file already being sent, skipping");
            return Ok(SendOutcome::Suppressed);
        };

        match self.mode.chunk_size_for(file.size) {
            Some(chunk_size) => self.send_chunked(file, chunk_size, transfer_id, tx).await,
            None => self.send_whole(file, transfer_id, tx).await,
        }
    }

    fn claim(&self, key: SendKey, transfer_id: &TransferId) -> Option<InFlightGuard> {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(transfer_id.clone());
                Some(InFlightGuard {
                    table: self.in_flight.clone(),
                    key,
                })
            }
        }
    }

    async fn send_chunked(
        &self,
        file: &LocalFile,
        chunk_size: usize,
        transfer_id: TransferId,
        tx: &mpsc::Sender<WireMessage>,
    ) -> Result<SendOutcome, SendError> {
        let plan = ChunkPlan::new(file.size, chunk_size)?;
        let mut reader = file.chunk_reader().await?;

        tracing::info!(
            %transfer_id,
            file = %file.name,
            bytes = file.size,
            chunks = plan.total_chunks,
            "sending file in chunks"
        );

        queue(
            tx,
            WireMessage::Descriptor(Descriptor {
                transfer_id: transfer_id.clone(),
                file_name: file.name.clone(),
                file_size: file.size,
                file_type: file.content_type.clone(),
                total_chunks: plan.total_chunks,
            }),
        )
        .await?;

        for index in 0..plan.total_chunks {
            if index > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            let (offset, len) = plan.range(index);
            let payload = reader.read(offset, len).await?;
            queue(
                tx,
                WireMessage::Chunk(Chunk {
                    transfer_id: transfer_id.clone(),
                    index,
                    payload,
                }),
            )
            .await?;
            tracing::debug!(
                %transfer_id,
                index,
                percent = progress_percent(index + 1, plan.total_chunks),
                "chunk queued"
            );
        }

        queue(
            tx,
            WireMessage::End(EndOfTransfer {
                transfer_id: transfer_id.clone(),
                original_size: file.size,
            }),
        )
        .await?;

        tracing::info!(%transfer_id, file = %file.name, bytes = file.size, "file sent");
        Ok(SendOutcome::Sent {
            transfer_id,
            chunks: Some(plan.total_chunks),
        })
    }

    async fn send_whole(
        &self,
        file: &LocalFile,
        transfer_id: TransferId,
        tx: &mpsc::Sender<WireMessage>,
    ) -> Result<SendOutcome, SendError> {
        if !fits_in_frame(file, file.size) {
            return Err(SendError::FileTooLarge {
                name: file.name.clone(),
                size: file.size,
            });
        }
        let data = file.read_all().await?;
        if !fits_in_frame(file, data.len() as u64) {
            return Err(SendError::FileTooLarge {
                name: file.name.clone(),
                size: data.len() as u64,
            });
        }

        queue(tx, whole_file_message(transfer_id.clone(), file, &data)).await?;

        tracing::info!(%transfer_id, file = %file.name, bytes = data.len(), "file sent whole");
        Ok(SendOutcome::Sent {
            transfer_id,
            chunks: None,
        })
    }
}

/// Build the single self-contained message for a whole-file transfer.
pub fn whole_file_message(transfer_id: TransferId, file: &LocalFile, data: &[u8]) -> WireMessage {
    WireMessage::WholeFile(WholeFile {
        transfer_id,
        file_name: file.name.clone(),
        file_size: data.len() as u64,
        file_type: file.content_type.clone(),
        data: encode_data(data),
        checksum: Some(additive16(data)),
    })
}

/// Whether a whole-file message for `size` bytes stays under the frame limit.
fn fits_in_frame(file: &LocalFile, size: u64) -> bool {
    // JSON escaping can expand each byte of a name to six.
    let envelope = ENVELOPE_SLACK + 6 * (file.name.len() + file.content_type.len());
    usize::try_from(size)
        .map(|n| encoded_len(n).saturating_add(envelope) <= MAX_FRAME_LEN)
        .unwrap_or(false)
}

async fn queue(tx: &mpsc::Sender<WireMessage>, message: WireMessage) -> Result<(), SendError> {
    tx.send(message).await.map_err(|_| SendError::ChannelClosed)
}

/// Releases a duplicate-send claim when the send ends, however it ends.
struct InFlightGuard {
    table: Arc<DashMap<SendKey, TransferId>>,
    key: SendKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.table.remove(&self.key);
    }
}
