//! TL0 Simulator - sender and receiver over a lossy in-memory channel
//!
//! Encodes a synthetic SVC stream, drops packets on the way, and answers the
//! receiver's NACK and keyframe requests until every picture is through.

use clap::Parser;
use std::path::PathBuf;
use tl0::{MemoryTransport, ReceiverSession, RtpPacket, SenderSession};
use tl0_cli::stats::{display_receiver_stats, display_sender_stats};
use tl0_cli::{Config, LossyChannel, SyntheticEncoder};
use tl0_protocol::split_access_unit;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tl0-sim")]
#[command(about = "TL0 lossy-channel simulation", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pictures to encode (overrides the configuration file)
    #[arg(short, long)]
    pictures: Option<usize>,

    /// Drop every Nth packet, 0 for a lossless channel (overrides the configuration file)
    #[arg(short, long)]
    drop_every: Option<usize>,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

type Sender = SenderSession<MemoryTransport>;
type Receiver = ReceiverSession<MemoryTransport>;

/// Forward feedback from the receiver to the sender
fn feedback(sender: &mut Sender, receiver: &mut Receiver) -> anyhow::Result<()> {
    while let Some(record) = receiver.transport_mut().nacks.pop_front() {
        sender.on_nack(record)?;
    }
    if std::mem::take(&mut receiver.transport_mut().keyframe_requests) > 0 {
        sender.on_keyframe_request();
    }
    Ok(())
}

/// Move everything the sender queued across the channel
fn pump(
    sender: &mut Sender,
    receiver: &mut Receiver,
    channel: &mut LossyChannel,
) -> anyhow::Result<()> {
    while let Some(packet) = sender.transport_mut().packets.pop_front() {
        if !channel.pass(&packet) {
            continue;
        }

        let packet = RtpPacket::from_bytes(packet.to_bytes())?;
        receiver.handle_packet(packet)?;
        feedback(sender, receiver)?;
    }
    Ok(())
}

/// Stand-in decoder: an access unit must split into valid NAL units
fn decode(access_unit: &[u8]) -> bool {
    match split_access_unit(access_unit) {
        Ok(units) => !units.is_empty() && units.iter().all(Result::is_ok),
        Err(_) => false,
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load '{}': {}", path.display(), e))?,
        None => Config::default(),
    };
    if let Some(pictures) = args.pictures {
        config.stream.pictures = pictures;
    }
    if let Some(drop_every) = args.drop_every {
        config.channel.drop_every = drop_every;
    }
    config.validate()?;

    if let Some(path) = &args.dump_config {
        config.to_file(path)?;
        tracing::info!("Configuration written to {}", path.display());
        return Ok(());
    }

    tracing::info!(
        "Simulating {} pictures, dropping every {} packets",
        config.stream.pictures,
        config.channel.drop_every
    );

    let mut encoder = SyntheticEncoder::new(
        config.stream.keyframe_interval,
        config.stream.slices_per_picture,
        config.stream.slice_size,
    );
    let mut sender = SenderSession::new(MemoryTransport::new(), config.sender_options());
    let mut receiver = ReceiverSession::new(MemoryTransport::new(), config.receiver_options());
    let mut channel = LossyChannel::new(config.channel.drop_every);

    let mut decoded = 0u64;
    let mut corrupt = 0u64;

    for _ in 0..config.stream.pictures {
        if sender.take_keyframe_request() {
            encoder.force_keyframe();
        }

        let picture = encoder.next_picture();
        if let Err(e) = sender.send_picture(&picture) {
            tracing::warn!("Picture {} not sent: {}", encoder.frames(), e);
        }

        pump(&mut sender, &mut receiver, &mut channel)?;

        while let Some(access_unit) = receiver.pop_access_unit() {
            if decode(&access_unit) {
                decoded += 1;
            } else {
                corrupt += 1;
                receiver.report_decode_error()?;
                feedback(&mut sender, &mut receiver)?;
            }
        }
    }

    display_sender_stats(sender.stats());
    display_receiver_stats(receiver.stats());
    println!(
        "\nEncoded {} pictures, decoded {} access units ({} corrupt), channel dropped {} packets",
        encoder.frames(),
        decoded,
        corrupt,
        channel.dropped()
    );

    Ok(())
}
