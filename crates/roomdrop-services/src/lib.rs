//! roomdrop-services: file transfer encoding and decoding, delivery, and the
//! peer connection plumbing the daemon runs on.

pub mod decoder;
pub mod delivery;
pub mod encoder;
pub mod host;
pub mod joiner;
pub mod reassembly;
pub mod session;
pub mod transport;

pub use decoder::{DecodeOutcome, IgnoreReason, ReceivedFile, TransferDecoder, TransferError, TransferPhase};
pub use delivery::{DeliveryError, DownloadDir};
pub use encoder::{LocalFile, SendError, SendMode, SendOutcome, TransferEncoder};
pub use host::{Host, HostEvent};
pub use joiner::{join_and_send, FileReport};
pub use reassembly::{ReassemblyBuffer, MAX_TOTAL_CHUNKS};
pub use session::{PeerSession, SessionEvent, SessionState};
pub use transport::{PeerConnection, TransportError};
