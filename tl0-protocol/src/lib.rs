//! TL0 Protocol Core Implementation
//!
//! This crate implements the layer-aware delivery core for scalable (SVC)
//! H.264 over RTP: NAL unit scanning, the SVC header and TL0 descriptor
//! codecs, the encoder-side packetizer, and the receiver-side access unit
//! tracker, retransmission scheduler and delivery gate.

pub mod codec;
pub mod descriptor;
pub mod gate;
pub mod nack;
pub mod nal;
pub mod packetizer;
pub mod sequence;
pub mod svc;
pub mod tracker;

pub use codec::{CapacityError, ParseError, MAX_NALUS_PER_ACCESS_UNIT};
pub use descriptor::{
    decode_descriptor, encode_descriptor, is_aggregate, AggregatePacket, Tl0Descriptor,
    DESCRIPTOR_SIZE, NAL_TYPE_AGGREGATE,
};
pub use gate::{DeliveryGate, GateStats, Verdict};
pub use nack::{NackRecord, RetransmissionScheduler, MAX_NACK_TOLERANCE};
pub use nal::{find_start_code, nal_type, segment, split_access_unit, NalHeader, NalUnit, NalUnits};
pub use packetizer::{
    packetize, PacketSink, PacketizeError, PacketizeReport, PacketizerState, Picture, PictureRole,
    Tl0IndexAllocator,
};
pub use sequence::{RtpSeq, SeqSpan};
pub use svc::SvcHeader;
pub use tracker::{
    BaseUpdate, EnhancementLayerStatus, EnhancementSlot, EnhancementUpdate, LayerState, Registered,
    Tl0Info, Tl0State, Tl0Tracker, TrackerError,
};
