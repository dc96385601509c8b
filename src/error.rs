use std::io;
use thiserror::Error;

/// Custom error type for the opswatch library
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("GPU not available: {0}")]
    GpuNotAvailable(String),
}

/// Typed failures of alert rule management and notification dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("alert rule not found")]
    RuleNotFound,

    #[error("alert rule already exists")]
    RuleExists,

    #[error("invalid rule ID")]
    InvalidRuleId,

    #[error("invalid rule name")]
    InvalidRuleName,

    #[error("invalid metric")]
    InvalidMetric,

    #[error("invalid operator")]
    InvalidOperator,

    #[error("invalid threshold")]
    InvalidThreshold,

    #[error("invalid severity")]
    InvalidSeverity,

    #[error("invalid duration format")]
    InvalidDuration,

    #[error("cannot modify builtin rule ID")]
    BuiltinRule,

    #[error("preset not found: {0}")]
    PresetNotFound(String),

    #[error("channel not configured: {0}")]
    ChannelNotConfigured(String),

    #[error("unknown channel type: {0}")]
    UnknownChannel(String),

    #[error("notification failed: {0}")]
    Notification(String),
}

/// Result type alias for the opswatch library
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        MonitorError::Config(msg.into())
    }

    pub fn gpu_not_available<S: Into<String>>(msg: S) -> Self {
        MonitorError::GpuNotAvailable(msg.into())
    }
}

impl AlertError {
    pub fn notification<S: Into<String>>(msg: S) -> Self {
        AlertError::Notification(msg.into())
    }

    /// True for errors caused by bad caller input rather than a missing entity.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            AlertError::RuleNotFound | AlertError::PresetNotFound(_)
        )
    }
}
