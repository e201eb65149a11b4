//! Formatting utilities

use egg_archive::EntryInfo;
use humansize::{DECIMAL, format_size};

/// Format file size in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    format_size(bytes, DECIMAL)
}

/// Format a percentage
pub fn format_percentage(value: f64) -> String {
    format!("{value:.1}%")
}

/// Format a compression ratio
pub fn format_compression_ratio(original: u64, compressed: u64) -> String {
    if original == 0 {
        "N/A".to_string()
    } else {
        let ratio = 100.0 - (compressed as f64 / original as f64 * 100.0);
        format_percentage(ratio)
    }
}

/// Format an entry's DOS timestamp
pub fn format_entry_time(entry: &EntryInfo) -> String {
    entry.modified.to_naive().map_or_else(
        || "Invalid timestamp".to_string(),
        |datetime| datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}
