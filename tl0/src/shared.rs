//! Thread-shared receiver handle
//!
//! The network thread feeds packets while the decoder thread pulls access
//! units and reports decode errors; both go through the same lock.

use crate::assembler::{AccessUnitAssembler, DecoderInput};
use crate::error::SessionError;
use crate::jitter::{JitterBuffer, ReorderBuffer};
use crate::receiver::{ReceiverSession, ReceiverStats};
use crate::rtp::RtpPacket;
use crate::transport::Transport;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;

/// Cloneable handle to a [`ReceiverSession`]
pub struct SharedReceiver<T, J = ReorderBuffer, D = AccessUnitAssembler> {
    inner: Arc<RwLock<ReceiverSession<T, J, D>>>,
}

impl<T, J, D> Clone for SharedReceiver<T, J, D> {
    fn clone(&self) -> Self {
        SharedReceiver {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport, J: JitterBuffer, D: DecoderInput> SharedReceiver<T, J, D> {
    pub fn new(session: ReceiverSession<T, J, D>) -> Self {
        SharedReceiver {
            inner: Arc::new(RwLock::new(session)),
        }
    }

    pub fn handle_packet(&self, packet: RtpPacket) -> Result<(), SessionError> {
        self.inner.write().handle_packet(packet)
    }

    pub fn pop_access_unit(&self) -> Option<Bytes> {
        self.inner.write().pop_access_unit()
    }

    pub fn report_decode_error(&self) -> Result<(), SessionError> {
        self.inner.write().report_decode_error()
    }

    pub fn request_keyframe(&self) -> Result<(), SessionError> {
        self.inner.write().request_keyframe()
    }

    /// Snapshot of the receiver statistics
    pub fn stats(&self) -> ReceiverStats {
        self.inner.read().stats().clone()
    }

    /// Run `f` with exclusive access to the session
    pub fn with_session<R>(&self, f: impl FnOnce(&mut ReceiverSession<T, J, D>) -> R) -> R {
        f(&mut *self.inner.write())
    }
}
