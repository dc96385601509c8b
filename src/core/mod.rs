// Core monitoring logic

pub mod alerts;
pub mod config;
pub mod telemetry;

// Re-export commonly used items
pub use alerts::AlertManager;
pub use config::Config;
pub use telemetry::{HubBuilder, Snapshot, SnapshotHub, Topic};
