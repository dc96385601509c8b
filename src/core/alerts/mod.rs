//! Threshold alerting over the hub's headline metrics.

pub mod manager;
pub mod notifier;
pub mod rules;
pub mod store;
pub mod types;

pub use manager::AlertManager;
pub use notifier::Notifier;
pub use rules::{RuleDraft, RulePreset, PRESETS};
pub use store::AlertStore;
pub use types::{
    ActiveAlert, AlertConfig, AlertEvent, AlertRule, AlertStatus, AlertSummary, HistoryQuery,
    NotificationChannel, Operator, PaginatedHistory, RuleState, Severity,
};
