//! TL0 Inspect - list the NAL units of an Annex B file
//!
//! Prints one line per NAL unit: offset, type, NRI, size and, for SVC
//! prefix and extension units, the decoded SVC header.

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tl0_protocol::{segment, SvcHeader};

#[derive(Parser, Debug)]
#[command(name = "tl0-inspect")]
#[command(about = "List NAL units and SVC headers of an Annex B stream", long_about = None)]
struct Args {
    /// Annex B file to inspect
    file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let data = fs::read(&args.file)
        .map_err(|e| anyhow::anyhow!("Failed to read '{}': {}", args.file.display(), e))?;

    let mut units = 0usize;
    let mut errors = 0usize;
    let mut layers = [0usize; 8];

    for unit in segment(&data) {
        let unit = match unit {
            Ok(unit) => unit,
            Err(e) => {
                tracing::warn!("Malformed NAL unit: {}", e);
                errors += 1;
                continue;
            }
        };
        units += 1;

        let mut line = format!(
            "{:>10}  type {:>2}  nri {}  {:>7} bytes",
            unit.start,
            unit.nal_type(),
            unit.nal_ref_idc(),
            unit.payload_len
        );

        if unit.header.has_svc_extension() {
            match SvcHeader::decode(&data, unit.payload_offset + 1) {
                Ok(svc) => {
                    layers[svc.temporal_id as usize] += 1;
                    line.push_str(&format!(
                        "  tid {} did {} qid {} prid {}{}{}",
                        svc.temporal_id,
                        svc.dependency_id,
                        svc.quality_id,
                        svc.priority_id,
                        if svc.idr { " idr" } else { "" },
                        if svc.discardable { " discardable" } else { "" }
                    ));
                }
                Err(e) => line.push_str(&format!("  bad SVC header: {}", e)),
            }
        }

        println!("{}", line);
    }

    println!("\n{} NAL units, {} malformed", units, errors);
    for (tid, count) in layers.iter().enumerate().filter(|&(_, &c)| c > 0) {
        println!("  temporal layer {}: {} SVC units", tid, count);
    }

    Ok(())
}
