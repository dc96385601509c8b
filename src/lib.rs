// opswatch library - public API

// Re-export error types
pub mod error;
pub use error::{AlertError, MonitorError, Result};

// Module declarations
pub mod core;
pub mod server;
pub mod utils;

// Re-export commonly used types
pub use core::alerts::AlertManager;
pub use core::config::Config;
pub use core::telemetry::{Snapshot, SnapshotHub};

// Initialize logging; RUST_LOG overrides the default level
pub fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
