//! Small helpers shared across collectors, the alert engine and the server.

pub mod duration;
pub mod format;
pub mod procfs;

pub use duration::{parse_duration, parse_seconds_or_duration, ParseDurationError};
pub use format::{format_age, format_elapsed, format_local_timestamp, format_size, round2};
pub use procfs::HostFs;
