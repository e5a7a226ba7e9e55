//! Transfer decoder: turns arriving transfer messages back into files.
//!
//! Both encodings go through [`TransferDecoder::handle`]:
//!
//! - chunked: `file-start` allocates a [`ReassemblyBuffer`], `file-chunk`
//!   fills slots, `file-end` verifies and delivers;
//! - whole-file: one `file-transfer` message is decoded, size- and
//!   checksum-verified, and delivered.
//!
//! Integrity failures abort only the transfer they belong to. Nothing is
//! retried and nothing partial is ever delivered.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use roomdrop_core::wire::decode_data;
use roomdrop_core::{additive16, Chunk, Descriptor, EndOfTransfer, TransferId, WholeFile, WireMessage};

use crate::reassembly::{ReassemblyBuffer, SlotInsert, MAX_PENDING_CHUNKS};

/// Content type used when the sender declared none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A fully verified file, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub transfer_id: TransferId,
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Why a message had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownTransfer,
    IndexOutOfRange,
    AlreadyReceiving,
    AlreadyFinished,
    NotTransferMessage,
}

/// What handling one message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Started {
        transfer_id: TransferId,
        total_chunks: u32,
    },
    Progress {
        transfer_id: TransferId,
        filled: u32,
        total: u32,
        percent: u8,
    },
    Ignored(IgnoreReason),
    Delivered(ReceivedFile),
}

/// Where a transfer stands from the decoder's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    AwaitingDescriptor,
    Receiving { filled: u32, total: u32 },
    /// Completed or failed. No transition leaves this phase.
    Finished,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer {transfer_id}: missing {} of {total} chunks", .missing.len())]
    MissingChunks {
        transfer_id: TransferId,
        missing: Vec<u32>,
        total: u32,
    },
    #[error("transfer {transfer_id}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        transfer_id: TransferId,
        expected: u64,
        actual: u64,
    },
    #[error("transfer {transfer_id}: checksum {actual:#06x} does not match declared {expected:#06x}")]
    ChecksumMismatch {
        transfer_id: TransferId,
        expected: u16,
        actual: u16,
    },
    #[error("transfer {transfer_id}: payload is not valid base64")]
    Encoding {
        transfer_id: TransferId,
        source: base64::DecodeError,
    },
    #[error("transfer {transfer_id}: descriptor declares {total_chunks} chunks for {file_size} bytes")]
    MalformedDescriptor {
        transfer_id: TransferId,
        total_chunks: u32,
        file_size: u64,
    },
    #[error("transfer {transfer_id}: {requested} more chunks would exceed the {pending} already pending")]
    TooManyPending {
        transfer_id: TransferId,
        requested: u32,
        pending: u64,
    },
}

impl TransferError {
    pub fn transfer_id(&self) -> &str {
        match self {
            Self::MissingChunks { transfer_id, .. }
            | Self::SizeMismatch { transfer_id, .. }
            | Self::ChecksumMismatch { transfer_id, .. }
            | Self::Encoding { transfer_id, .. }
            | Self::MalformedDescriptor { transfer_id, .. }
            | Self::TooManyPending { transfer_id, .. } => transfer_id,
        }
    }
}

/// Receiver-side state for one connection.
#[derive(Debug, Default)]
pub struct TransferDecoder {
    buffers: HashMap<TransferId, ReassemblyBuffer>,
    /// Completed or failed ids; later messages for them are ignored.
    finished: HashSet<TransferId>,
    /// Slots allocated across all open buffers.
    pending_slots: u64,
}

impl TransferDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single entry point for every transfer message, in arrival order.
    pub fn handle(&mut self, message: WireMessage) -> Result<DecodeOutcome, TransferError> {
        match message {
            WireMessage::Descriptor(d) => self.on_descriptor(d),
            WireMessage::Chunk(c) => Ok(self.on_chunk(c)),
            WireMessage::End(e) => self.on_end(e),
            WireMessage::WholeFile(w) => self.on_whole_file(w),
            WireMessage::Nickname { .. } | WireMessage::Join { .. } => {
                Ok(DecodeOutcome::Ignored(IgnoreReason::NotTransferMessage))
            }
        }
    }

    pub fn phase(&self, transfer_id: &str) -> TransferPhase {
        if self.finished.contains(transfer_id) {
            TransferPhase::Finished
        } else if let Some(buf) = self.buffers.get(transfer_id) {
            TransferPhase::Receiving {
                filled: buf.filled(),
                total: buf.total(),
            }
        } else {
            TransferPhase::AwaitingDescriptor
        }
    }

    /// Number of chunked transfers currently being reassembled.
    pub fn in_flight(&self) -> usize {
        self.buffers.len()
    }

    /// Drop all receiver state. Returns how many in-flight transfers were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buffers.len();
        for (transfer_id, buf) in self.buffers.drain() {
            tracing::warn!(
                %transfer_id,
                file = %buf.descriptor().file_name,
                filled = buf.filled(),
                total = buf.total(),
                "discarding in-flight transfer"
            );
        }
        self.finished.clear();
        self.pending_slots = 0;
        dropped
    }

    fn on_descriptor(&mut self, d: Descriptor) -> Result<DecodeOutcome, TransferError> {
        if self.finished.contains(&d.transfer_id) {
            tracing::warn!(transfer_id = %d.transfer_id, "descriptor for finished transfer, ignoring");
            return Ok(DecodeOutcome::Ignored(IgnoreReason::AlreadyFinished));
        }
        if self.buffers.contains_key(&d.transfer_id) {
            tracing::warn!(transfer_id = %d.transfer_id, "duplicate descriptor, ignoring");
            return Ok(DecodeOutcome::Ignored(IgnoreReason::AlreadyReceiving));
        }
        if !ReassemblyBuffer::is_plausible(&d) {
            self.finished.insert(d.transfer_id.clone());
            return Err(TransferError::MalformedDescriptor {
                transfer_id: d.transfer_id,
                total_chunks: d.total_chunks,
                file_size: d.file_size,
            });
        }
        let requested = u64::from(d.total_chunks);
        if self.pending_slots + requested > MAX_PENDING_CHUNKS {
            tracing::warn!(
                transfer_id = %d.transfer_id,
                requested,
                pending = self.pending_slots,
                "too many chunks pending, refusing transfer"
            );
            self.finished.insert(d.transfer_id.clone());
            return Err(TransferError::TooManyPending {
                transfer_id: d.transfer_id,
                requested: d.total_chunks,
                pending: self.pending_slots,
            });
        }

        tracing::info!(
            transfer_id = %d.transfer_id,
            file = %d.file_name,
            bytes = d.file_size,
            chunks = d.total_chunks,
            "receiving file"
        );
        let outcome = DecodeOutcome::Started {
            transfer_id: d.transfer_id.clone(),
            total_chunks: d.total_chunks,
        };
        self.pending_slots += requested;
        self.buffers
            .insert(d.transfer_id.clone(), ReassemblyBuffer::new(d));
        Ok(outcome)
    }

    fn on_chunk(&mut self, c: Chunk) -> DecodeOutcome {
        let Some(buf) = self.buffers.get_mut(&c.transfer_id) else {
            let reason = if self.finished.contains(&c.transfer_id) {
                IgnoreReason::AlreadyFinished
            } else {
                IgnoreReason::UnknownTransfer
            };
            tracing::warn!(transfer_id = %c.transfer_id, index = c.index, ?reason, "chunk for unknown transfer, discarding");
            return DecodeOutcome::Ignored(reason);
        };

        match buf.insert(c.index, c.payload) {
            inserted @ (SlotInsert::Stored | SlotInsert::Duplicate) => {
                let (filled, total) = (buf.filled(), buf.total());
                let percent = buf.progress_percent();
                if inserted == SlotInsert::Duplicate {
                    tracing::debug!(transfer_id = %c.transfer_id, index = c.index, "duplicate chunk ignored");
                } else if filled % 10 == 0 || filled == total {
                    tracing::debug!(transfer_id = %c.transfer_id, filled, total, percent, "receiving");
                }
                DecodeOutcome::Progress {
                    transfer_id: c.transfer_id,
                    filled,
                    total,
                    percent,
                }
            }
            SlotInsert::OutOfRange => {
                tracing::warn!(
                    transfer_id = %c.transfer_id,
                    index = c.index,
                    total = buf.total(),
                    "chunk index out of range, discarding"
                );
                DecodeOutcome::Ignored(IgnoreReason::IndexOutOfRange)
            }
        }
    }

    fn on_end(&mut self, e: EndOfTransfer) -> Result<DecodeOutcome, TransferError> {
        let Some(buf) = self.buffers.remove(&e.transfer_id) else {
            let reason = if self.finished.contains(&e.transfer_id) {
                IgnoreReason::AlreadyFinished
            } else {
                IgnoreReason::UnknownTransfer
            };
            tracing::warn!(transfer_id = %e.transfer_id, ?reason, "end of unknown transfer, ignoring");
            return Ok(DecodeOutcome::Ignored(reason));
        };
        self.finished.insert(e.transfer_id.clone());
        self.pending_slots -= u64::from(buf.total());

        let descriptor = buf.descriptor().clone();
        let total = buf.total();
        let data = buf.assemble().map_err(|missing| TransferError::MissingChunks {
            transfer_id: e.transfer_id.clone(),
            missing,
            total,
        })?;

        let actual = data.len() as u64;
        if actual != descriptor.file_size {
            return Err(TransferError::SizeMismatch {
                transfer_id: e.transfer_id,
                expected: descriptor.file_size,
                actual,
            });
        }
        if e.original_size != descriptor.file_size {
            return Err(TransferError::SizeMismatch {
                transfer_id: e.transfer_id,
                expected: e.original_size,
                actual,
            });
        }

        tracing::info!(
            transfer_id = %e.transfer_id,
            file = %descriptor.file_name,
            bytes = actual,
            chunks = total,
            "file reassembled"
        );
        Ok(DecodeOutcome::Delivered(ReceivedFile {
            transfer_id: e.transfer_id,
            name: descriptor.file_name,
            content_type: content_type_or_default(descriptor.file_type),
            data,
        }))
    }

    fn on_whole_file(&mut self, w: WholeFile) -> Result<DecodeOutcome, TransferError> {
        if !self.finished.insert(w.transfer_id.clone()) {
            tracing::warn!(transfer_id = %w.transfer_id, "repeated whole-file transfer, ignoring");
            return Ok(DecodeOutcome::Ignored(IgnoreReason::AlreadyFinished));
        }

        let data = decode_data(&w.data).map_err(|source| TransferError::Encoding {
            transfer_id: w.transfer_id.clone(),
            source,
        })?;

        let actual = data.len() as u64;
        if actual != w.file_size {
            return Err(TransferError::SizeMismatch {
                transfer_id: w.transfer_id,
                expected: w.file_size,
                actual,
            });
        }
        if let Some(expected) = w.checksum {
            let actual = additive16(&data);
            if actual != expected {
                return Err(TransferError::ChecksumMismatch {
                    transfer_id: w.transfer_id,
                    expected,
                    actual,
                });
            }
        }

        tracing::info!(
            transfer_id = %w.transfer_id,
            file = %w.file_name,
            bytes = actual,
            "file received"
        );
        Ok(DecodeOutcome::Delivered(ReceivedFile {
            transfer_id: w.transfer_id,
            name: w.file_name,
            content_type: content_type_or_default(w.file_type),
            data: Bytes::from(data),
        }))
    }
}

fn content_type_or_default(declared: String) -> String {
    if declared.trim().is_empty() {
        DEFAULT_CONTENT_TYPE.to_string()
    } else {
        declared
    }
}
