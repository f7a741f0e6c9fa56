//! TL0 - Layer-aware SVC video over RTP
//!
//! Session layer on top of [`tl0_protocol`]: RTP framing, jitter buffering,
//! access unit assembly, and the sender and receiver sessions that drive the
//! packetizer, tracker, retransmission scheduler and delivery gate.

pub use tl0_protocol as protocol;

pub mod assembler;
pub mod error;
pub mod jitter;
pub mod receiver;
pub mod rtp;
pub mod sender;
pub mod shared;
pub mod transport;

// Re-export commonly used types
pub use assembler::{AccessUnitAssembler, AssembleError, DecoderInput};
pub use error::SessionError;
pub use jitter::{JitterBuffer, JitterError, ReorderBuffer};
pub use protocol::{NackRecord, RtpSeq, SeqSpan, Tl0Descriptor};
pub use receiver::{ReceiverOptions, ReceiverSession, ReceiverStats};
pub use rtp::{RtpError, RtpHeader, RtpPacket, RTP_HEADER_SIZE};
pub use sender::{EncodedPicture, RetransmitBuffer, SenderOptions, SenderSession, SenderStats};
pub use shared::SharedReceiver;
pub use transport::{MemoryTransport, Transport};
