//! Reassembly buffer for one chunked transfer.

use bytes::{Bytes, BytesMut};

use roomdrop_core::Descriptor;

/// Upper bound on slots a single descriptor may allocate.
pub const MAX_TOTAL_CHUNKS: u32 = 1 << 20;

/// Upper bound on slots allocated across every open buffer of one connection.
pub const MAX_PENDING_CHUNKS: u64 = 2 * MAX_TOTAL_CHUNKS as u64;

/// Result of offering a chunk to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotInsert {
    Stored,
    /// Slot already filled; the new payload was dropped.
    Duplicate,
    OutOfRange,
}

/// Fixed-size slot array indexed by chunk index. A slot is filled at most once.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    descriptor: Descriptor,
    slots: Vec<Option<Bytes>>,
    filled: u32,
}

impl ReassemblyBuffer {
    pub fn new(descriptor: Descriptor) -> Self {
        let slots = vec![None; descriptor.total_chunks as usize];
        Self {
            descriptor,
            slots,
            filled: 0,
        }
    }

    /// True when the descriptor's chunk count is plausible for its size.
    pub fn is_plausible(descriptor: &Descriptor) -> bool {
        descriptor.total_chunks <= MAX_TOTAL_CHUNKS
            && u64::from(descriptor.total_chunks) <= descriptor.file_size
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn insert(&mut self, index: u32, payload: Bytes) -> SlotInsert {
        match self.slots.get_mut(index as usize) {
            None => SlotInsert::OutOfRange,
            Some(Some(_)) => SlotInsert::Duplicate,
            Some(slot) => {
                *slot = Some(payload);
                self.filled += 1;
                SlotInsert::Stored
            }
        }
    }

    pub fn filled(&self) -> u32 {
        self.filled
    }

    pub fn total(&self) -> u32 {
        self.descriptor.total_chunks
    }

    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.filled, self.total())
    }

    /// Indices of slots still unset, ascending.
    pub fn missing(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Concatenate slots in index order, or return the missing indices.
    pub fn assemble(self) -> Result<Bytes, Vec<u32>> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(missing);
        }
        let len = self.slots.iter().flatten().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(len);
        for slot in self.slots.into_iter().flatten() {
            out.extend_from_slice(&slot);
        }
        Ok(out.freeze())
    }
}

/// `done / total` as a percentage rounded to the nearest integer.
/// An empty transfer counts as complete.
pub fn progress_percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = u64::from(done.min(total));
    let total = u64::from(total);
    ((done * 100 + total / 2) / total) as u8
}
