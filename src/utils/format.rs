use chrono::{DateTime, Local};
use humansize::{format_size as human_format_size, BINARY};

/// Round to two decimal places, the precision of every numeric field on the wire.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Format a byte count with binary units ("512 B", "1.50 GiB").
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else {
        human_format_size(bytes, BINARY.decimal_zeroes(2))
    }
}

/// Coarse age of a process: `42s`, `5m`, `3h`, `12d`.
pub fn format_age(secs: i64) -> String {
    let secs = secs.max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

/// `yyyy/MM/dd HH:mm:ss` in local time.
pub fn format_local_timestamp(unix_secs: i64) -> String {
    match DateTime::from_timestamp(unix_secs, 0) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y/%m/%d %H:%M:%S")
            .to_string(),
        None => String::new(),
    }
}

/// Render a duration the way `active_alerts` reports it, e.g. `1h2m3s`.
pub fn format_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
