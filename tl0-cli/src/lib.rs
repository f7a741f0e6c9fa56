//! TL0 CLI Library
//!
//! Shared functionality for the TL0 command-line tools.

pub mod channel;
pub mod config;
pub mod stats;
pub mod synth;

pub use channel::LossyChannel;
pub use config::{ChannelConfig, Config, ConfigError, ReceiverConfig, SenderConfig, StreamConfig};
pub use stats::{display_receiver_stats, display_sender_stats, format_bytes};
pub use synth::SyntheticEncoder;
