//! Configuration file support for the TL0 tools

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tl0::{ReceiverOptions, SenderOptions};

/// Synthetic stream shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Pictures to encode
    #[serde(default = "default_pictures")]
    pub pictures: usize,
    /// Pictures between two IDR pictures (rounded up to a whole TL0 period)
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: usize,
    /// Slices per enhancement picture
    #[serde(default = "default_slices")]
    pub slices_per_picture: usize,
    /// Bytes of slice data per NAL unit
    #[serde(default = "default_slice_size")]
    pub slice_size: usize,
}

fn default_pictures() -> usize {
    120
}

fn default_keyframe_interval() -> usize {
    60
}

fn default_slices() -> usize {
    2
}

fn default_slice_size() -> usize {
    400
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            pictures: default_pictures(),
            keyframe_interval: default_keyframe_interval(),
            slices_per_picture: default_slices(),
            slice_size: default_slice_size(),
        }
    }
}

/// Lossy channel between sender and receiver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Drop every Nth first transmission (0 disables loss)
    #[serde(default)]
    pub drop_every: usize,
}

/// Sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    #[serde(default = "default_ssrc")]
    pub ssrc: u32,
    /// Maximum RTP payload size
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// Packets kept for retransmission
    #[serde(default = "default_history")]
    pub history: usize,
    #[serde(default)]
    pub initial_seq: u16,
}

fn default_ssrc() -> u32 {
    SenderOptions::default().ssrc
}

fn default_mtu() -> usize {
    1200
}

fn default_history() -> usize {
    1024
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            ssrc: default_ssrc(),
            mtu: default_mtu(),
            history: default_history(),
            initial_seq: 0,
        }
    }
}

/// Receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Packets tolerated while waiting for a requested keyframe
    #[serde(default = "default_fir_tolerance")]
    pub fir_packet_tolerance: u32,
    /// Polls between two NACKs for the same packet
    #[serde(default = "default_nack_tolerance")]
    pub nack_tolerance: u8,
    /// Jitter buffer size in packets
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Packets held behind a gap before it is skipped
    #[serde(default = "default_reorder_depth")]
    pub reorder_depth: usize,
}

fn default_fir_tolerance() -> u32 {
    tl0::receiver::FIR_PACKET_TOLERANCE
}

fn default_nack_tolerance() -> u8 {
    tl0_protocol::MAX_NACK_TOLERANCE
}

fn default_buffer_size() -> usize {
    512
}

fn default_reorder_depth() -> usize {
    32
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            fir_packet_tolerance: default_fir_tolerance(),
            nack_tolerance: default_nack_tolerance(),
            buffer_size: default_buffer_size(),
            reorder_depth: default_reorder_depth(),
        }
    }
}

/// Combined simulation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub receiver: ReceiverConfig,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the sessions cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.slices_per_picture == 0 || self.stream.slices_per_picture > 127 {
            return Err(ConfigError::Invalid(format!(
                "slices_per_picture must be 1..=127, got {}",
                self.stream.slices_per_picture
            )));
        }
        if self.stream.slice_size == 0 {
            return Err(ConfigError::Invalid("slice_size must be positive".to_string()));
        }
        if self.sender.mtu <= tl0_protocol::DESCRIPTOR_SIZE {
            return Err(ConfigError::Invalid(format!(
                "mtu {} leaves no room for a NAL unit",
                self.sender.mtu
            )));
        }
        Ok(())
    }

    pub fn sender_options(&self) -> SenderOptions {
        SenderOptions {
            ssrc: self.sender.ssrc,
            max_packet_size: self.sender.mtu,
            retransmit_capacity: self.sender.history,
            initial_seq: self.sender.initial_seq,
            ..Default::default()
        }
    }

    pub fn receiver_options(&self) -> ReceiverOptions {
        ReceiverOptions {
            fir_packet_tolerance: self.receiver.fir_packet_tolerance,
            nack_tolerance: self.receiver.nack_tolerance,
            jitter_capacity: self.receiver.buffer_size,
            jitter_depth: self.receiver.reorder_depth,
            ..Default::default()
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
