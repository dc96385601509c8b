//! Live telemetry: metric sources, their collectors and the snapshot hub that
//! merges them for subscribers.

pub mod cell;
pub mod collector;
pub mod history;
pub mod hub;
pub mod metrics;
pub mod snapshot;
pub mod source;
pub mod sources;
pub mod topic;

pub use cell::{LatestCell, Sample};
pub use collector::IndependentCollector;
pub use history::MetricsHistory;
pub use hub::{alert_metrics, AlertSink, HubBuilder, MetricValues, SnapshotHub};
pub use snapshot::{Snapshot, Topic, TopicSet};
pub use source::{FnSource, MetricSource};
pub use topic::TopicCollector;
