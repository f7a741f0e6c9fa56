//! Session errors

use std::io;
use thiserror::Error;
use tl0_protocol::packetizer::PacketizeError;
use tl0_protocol::tracker::TrackerError;

/// Errors surfaced by sender and receiver sessions
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Packetization error: {0}")]
    Packetize(#[from] PacketizeError),
}
