//! Synthetic SVC encoder
//!
//! Produces Annex B access units with the structure of a three-layer
//! temporal SVC stream (TL0 period of four pictures: T0, T2, T1, T2). The
//! slice data is filler; only the NAL framing and SVC headers are real.

use bytes::{BufMut, Bytes, BytesMut};
use tl0::EncodedPicture;
use tl0_protocol::nal_type;
use tl0_protocol::SvcHeader;

/// Temporal id of each picture within a TL0 period
const PERIOD: [u8; 4] = [0, 2, 1, 2];

/// 90 kHz ticks between pictures at 30 fps
const TIMESTAMP_STEP: u32 = 3000;

const SPS: [u8; 4] = [0x67, 0x42, 0xC0, 0x1E];
const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

/// Deterministic picture generator
#[derive(Debug, Clone)]
pub struct SyntheticEncoder {
    keyframe_interval: usize,
    slices: usize,
    slice_size: usize,
    frame: usize,
    since_keyframe: usize,
    force_keyframe: bool,
}

impl SyntheticEncoder {
    pub fn new(keyframe_interval: usize, slices: usize, slice_size: usize) -> Self {
        let period = PERIOD.len();
        SyntheticEncoder {
            keyframe_interval: (keyframe_interval.max(1) + period - 1) / period * period,
            slices: slices.max(1),
            slice_size: slice_size.max(1),
            frame: 0,
            since_keyframe: 0,
            force_keyframe: true,
        }
    }

    /// Make the next base picture an IDR picture
    pub fn force_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    /// Pictures produced so far
    pub fn frames(&self) -> usize {
        self.frame
    }

    fn start_code(buf: &mut BytesMut, long: bool) {
        if long {
            buf.put_slice(&[0, 0, 0, 1]);
        } else {
            buf.put_slice(&[0, 0, 1]);
        }
    }

    /// Filler slice data free of start code emulation
    fn slice_data(&self, buf: &mut BytesMut, seed: usize) {
        for i in 0..self.slice_size {
            buf.put_u8(0x80 | ((seed + i) & 0x3F) as u8);
        }
    }

    fn svc_header(temporal_id: u8, idr: bool) -> [u8; 3] {
        SvcHeader {
            idr,
            temporal_id,
            inter_layer_pred: temporal_id > 0,
            discardable: temporal_id == 2,
            output: true,
            ..Default::default()
        }
        .encode()
    }

    fn base_picture(&self, idr: bool) -> Bytes {
        let mut buf = BytesMut::new();
        if idr {
            Self::start_code(&mut buf, true);
            buf.put_slice(&SPS);
            Self::start_code(&mut buf, true);
            buf.put_slice(&PPS);
        }

        // Prefix NAL carrying the SVC header of the base slice
        Self::start_code(&mut buf, false);
        buf.put_u8(0x60 | nal_type::PREFIX);
        buf.put_slice(&Self::svc_header(0, idr));

        Self::start_code(&mut buf, false);
        let header = if idr { 0x60 | nal_type::IDR } else { 0x60 | nal_type::SLICE };
        buf.put_u8(header);
        self.slice_data(&mut buf, self.frame);
        buf.freeze()
    }

    fn enhancement_picture(&self, temporal_id: u8) -> Bytes {
        let nri = if temporal_id == 1 { 0x40 } else { 0x00 };
        let mut buf = BytesMut::new();
        for slice in 0..self.slices {
            Self::start_code(&mut buf, slice == 0);
            buf.put_u8(nri | nal_type::SLICE_EXTENSION);
            buf.put_slice(&Self::svc_header(temporal_id, false));
            self.slice_data(&mut buf, self.frame + slice);
        }
        buf.freeze()
    }

    /// Encode the next picture
    pub fn next_picture(&mut self) -> EncodedPicture {
        let temporal_id = PERIOD[self.frame % PERIOD.len()];
        let is_idr = temporal_id == 0
            && (self.force_keyframe || self.since_keyframe >= self.keyframe_interval);

        let data = if temporal_id == 0 {
            self.base_picture(is_idr)
        } else {
            self.enhancement_picture(temporal_id)
        };

        if is_idr {
            self.force_keyframe = false;
            self.since_keyframe = 0;
        }
        self.since_keyframe += 1;

        let picture = EncodedPicture {
            data,
            timestamp: (self.frame as u32).wrapping_mul(TIMESTAMP_STEP),
            is_idr,
            temporal_id,
        };
        self.frame += 1;
        picture
    }
}
