//! Statistics display and formatting

use tl0::{ReceiverStats, SenderStats};

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a ratio as a percentage
pub fn format_ratio(part: u64, total: u64) -> String {
    if total == 0 {
        "N/A".to_string()
    } else {
        format!("{:.1}%", part as f64 * 100.0 / total as f64)
    }
}

/// Display sender statistics
pub fn display_sender_stats(stats: &SenderStats) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ SENDER                                                      │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Pictures: {} sent / {} failed ({} keyframes)",
        stats.pictures_sent, stats.pictures_failed, stats.keyframes_sent
    );
    println!(
        "│ Packets:  {} ({})",
        stats.packets_sent,
        format_bytes(stats.bytes_sent)
    );
    println!(
        "│ NACKs:    {} records, {} resent, {} no longer held",
        stats.nack_records, stats.packets_retransmitted, stats.retransmit_misses
    );
    println!("│ Keyframe requests: {}", stats.keyframe_requests);
    println!("└─────────────────────────────────────────────────────────────┘");
}

/// Display receiver statistics
pub fn display_receiver_stats(stats: &ReceiverStats) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ RECEIVER                                                    │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Packets:  {} ({}), {} duplicates, {} parse errors",
        stats.packets_received,
        format_bytes(stats.bytes_received),
        stats.duplicates,
        stats.parse_errors
    );
    println!(
        "│ TL0:      {} complete, {} evicted",
        stats.tl0_completed, stats.evictions
    );
    println!(
        "│ Enhancement: {} accounted, {} discarded",
        stats.enhancement_packets, stats.enhancement_discarded
    );
    println!(
        "│ Gate:     {} delivered / {} skipped ({}), {} flushes",
        stats.delivered,
        stats.skipped,
        format_ratio(stats.skipped, stats.delivered + stats.skipped),
        stats.gate_flushes
    );
    println!(
        "│ Feedback: {} NACK records, {} keyframe requests",
        stats.nack_records, stats.keyframe_requests
    );
    println!(
        "│ Access units: {} ({} without keyframe)",
        stats.access_units, stats.missing_keyframe
    );
    println!("└─────────────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MB");
    }

    #[test]
    fn test_format_ratio() {
        assert_eq!(format_ratio(0, 0), "N/A");
        assert_eq!(format_ratio(1, 4), "25.0%");
    }
}
