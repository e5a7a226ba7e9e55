//! roomdrop-core: wire format, checksum, room codes, and configuration.
//! All other roomdrop crates depend on this one.

pub mod checksum;
pub mod config;
pub mod room;
pub mod wire;

pub use checksum::additive16;
pub use room::{random_nickname, RoomCode};
pub use wire::{Chunk, Descriptor, EndOfTransfer, TransferId, WholeFile, WireMessage};
