use sysinfo::Networks;
use tokio_util::sync::CancellationToken;

use crate::core::telemetry::metrics::NetworkReading;
use crate::core::telemetry::source::MetricSource;
use crate::utils::format::format_size;

/// Aggregated byte counters across every interface.
pub struct NetworkSource {
    networks: Networks,
}

impl NetworkSource {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl Default for NetworkSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Sum `(sent, received)` pairs.
pub fn totals<I: IntoIterator<Item = (u64, u64)>>(counters: I) -> NetworkReading {
    let (sent, recv) = counters
        .into_iter()
        .fold((0u64, 0u64), |(s, r), (tx, rx)| {
            (s.saturating_add(tx), r.saturating_add(rx))
        });
    NetworkReading {
        bytes_sent: format_size(sent),
        bytes_recv: format_size(recv),
        raw_sent: sent,
        raw_recv: recv,
    }
}

impl MetricSource for NetworkSource {
    type Reading = NetworkReading;

    fn name(&self) -> &'static str {
        "network"
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<NetworkReading> {
        if cancel.is_cancelled() {
            return None;
        }
        self.networks.refresh(true);
        Some(totals(
            self.networks
                .list()
                .values()
                .map(|data| (data.total_transmitted(), data.total_received())),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_sum_interfaces() {
        let reading = totals(vec![(1024, 512), (1024, 0)]);
        assert_eq!(reading.raw_sent, 2048);
        assert_eq!(reading.raw_recv, 512);
        assert_eq!(reading.bytes_sent, "2.00 KiB");
        assert_eq!(reading.bytes_recv, "512 B");
    }
}
