use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::metrics::*;

/// Subscription topics of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    Base,
    Processes,
    NetDetail,
}

impl Topic {
    /// Unknown names yield `None`; `top_processes` is an alias of `processes`.
    pub fn parse(name: &str) -> Option<Topic> {
        match name {
            "base" => Some(Topic::Base),
            "processes" | "top_processes" => Some(Topic::Processes),
            "net_detail" => Some(Topic::NetDetail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Base => "base",
            Topic::Processes => "processes",
            Topic::NetDetail => "net_detail",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subscriber's topics. Always contains [`Topic::Base`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet(BTreeSet<Topic>);

impl TopicSet {
    pub fn base() -> Self {
        Self(BTreeSet::from([Topic::Base]))
    }

    /// `{base}` plus every recognised name; unknown names are dropped.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::base();
        set.0
            .extend(names.into_iter().filter_map(|n| Topic::parse(n.as_ref())));
        set
    }

    pub fn contains(&self, topic: Topic) -> bool {
        self.0.contains(&topic)
    }

    /// Non-base topics, i.e. the ones backed by a topic collector.
    pub fn on_demand(&self) -> impl Iterator<Item = Topic> + '_ {
        self.0.iter().copied().filter(|t| *t != Topic::Base)
    }

    /// Topics in `self` that are missing from `other`.
    pub fn difference<'a>(&'a self, other: &'a TopicSet) -> impl Iterator<Item = Topic> + 'a {
        self.0.difference(&other.0).copied()
    }
}

impl Default for TopicSet {
    fn default() -> Self {
        Self::base()
    }
}

/// The merged record pushed to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cpu: CpuReading,
    pub fans: Vec<FanReading>,
    pub sensors: BTreeMap<String, Vec<SensorValue>>,
    pub power: PowerReading,
    pub memory: MemInfo,
    pub swap: SwapInfo,
    pub disk: Vec<DiskInfo>,
    pub disk_io: BTreeMap<String, DiskIoInfo>,
    pub inodes: Vec<InodeInfo>,
    pub network: NetInfo,
    pub ssh_stats: SshStats,
    pub boot_time: String,
    pub processes: Vec<ProcessInfo>,
    pub gpu: Vec<GpuDetail>,
}

impl Snapshot {
    /// Zero every field the subscriber did not ask for.
    pub fn retain_topics(&mut self, topics: &TopicSet) {
        if !topics.contains(Topic::Processes) {
            self.processes.clear();
        }
        if !topics.contains(Topic::NetDetail) {
            self.network.clear_detail();
            self.ssh_stats = SshStats::default();
        }
    }

    pub fn filtered(mut self, topics: &TopicSet) -> Self {
        self.retain_topics(topics);
        self
    }
}
