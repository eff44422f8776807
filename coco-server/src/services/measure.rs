//! Periodic measurement of queues and accounting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use coco_protocol::Packet;
use coco_telemetry::Registry;
use crossbeam_channel::Receiver;

use crate::accounting::Accounting;
use crate::counters::QueueGauges;
use crate::tier::Tiers;

/// Periodically samples queue depths and refreshes derived statistics.
///
/// Every tick records the depth of each registered queue under `queues`, recomputes the
/// metrics-per-host summaries of all tiers and, if configured, evicts stale accounting entries.
#[derive(Debug)]
pub struct Measure {
    interval: Duration,
    max_age: Option<Duration>,
    queues: Vec<(QueueGauges, Receiver<Packet>)>,
    tiers: Arc<Tiers>,
    accounting: Arc<Accounting>,
    registry: Arc<Registry>,
}

impl Measure {
    /// Creates a measure service ticking at the given interval.
    pub fn new(
        interval: Duration,
        tiers: Arc<Tiers>,
        accounting: Arc<Accounting>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            interval,
            max_age: None,
            queues: Vec::new(),
            tiers,
            accounting,
            registry,
        }
    }

    /// Samples the depth of the given queue.
    pub fn queue(mut self, gauge: QueueGauges, rx: Receiver<Packet>) -> Self {
        self.queues.push((gauge, rx));
        self
    }

    /// Evicts accounting entries older than `max_age` on every tick.
    pub fn max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Runs a single measurement.
    pub fn tick(&self) {
        for (gauge, rx) in &self.queues {
            self.registry.gauge(*gauge, rx.len() as i64);
        }

        if let Some(max_age) = self.max_age {
            let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            let cutoff = Utc::now().timestamp().saturating_sub(max_age);
            let removed = self.accounting.sweep(cutoff);
            if removed > 0 {
                coco_log::debug!("evicted {removed} stale accounting entries");
            }

            for target in self.tiers.iter().flat_map(|tier| tier.targets()) {
                target.update_gauges(target.bucket().stats());
            }
        }

        self.tiers.refresh_ratios(&self.registry);
    }

    /// Measures forever.
    pub fn run(self) {
        let ticker = crossbeam_channel::tick(self.interval);
        for _ in ticker {
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use coco_telemetry::Subsystem;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::testutils::MockDialer;

    fn tiers(registry: &Registry) -> Arc<Tiers> {
        let targets = vec!["10.0.0.1:25826".to_owned()];
        let tiers = Tiers::build([("tier1", targets.as_slice())], &MockDialer::new(), registry);
        Arc::new(tiers.unwrap())
    }

    #[test]
    fn test_tick_records_queue_depth() {
        let registry = Arc::new(Registry::new());
        let tiers = tiers(&registry);
        let accounting = Arc::new(Accounting::new(&tiers));
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Packet::default()).unwrap();
        tx.send(Packet::default()).unwrap();

        let measure = Measure::new(Duration::from_secs(10), tiers, accounting, Arc::clone(&registry))
            .queue(QueueGauges::Raw, rx);
        measure.tick();

        assert_eq!(registry.get(Subsystem::Queues, "raw"), Some(2));
    }

    #[test]
    fn test_tick_sweeps_and_refreshes() {
        let registry = Arc::new(Registry::new());
        let tiers = tiers(&registry);
        let accounting = Arc::new(Accounting::new(&tiers));

        let target = tiers.iter().next().unwrap().lookup("web-01").unwrap().clone();
        let now = Utc::now().timestamp();
        target.bucket().record("web-01", "fresh", now);
        target.bucket().record("web-01", "stale", now - 3600);
        target.bucket().record("web-02", "stale", now - 3600);

        let measure = Measure::new(Duration::from_secs(10), tiers, accounting, Arc::clone(&registry))
            .max_age(Some(Duration::from_secs(60)));
        measure.tick();

        assert_eq!(target.bucket().host_sizes(), vec![1]);
        assert_eq!(registry.get(Subsystem::HashHosts, "10.0.0.1:25826"), Some(1));
        assert_eq!(registry.get(Subsystem::HashMetrics, "10.0.0.1:25826"), Some(1));
        assert_eq!(registry.summary("tier1").map(|s| s.max), Some(1));
    }

    #[test]
    fn test_tick_with_huge_max_age_keeps_entries() {
        let registry = Arc::new(Registry::new());
        let tiers = tiers(&registry);
        let accounting = Arc::new(Accounting::new(&tiers));

        let target = tiers.iter().next().unwrap().lookup("web-01").unwrap().clone();
        target.bucket().record("web-01", "fresh", Utc::now().timestamp());

        let measure = Measure::new(Duration::from_secs(10), tiers, accounting, Arc::clone(&registry))
            .max_age(Some(Duration::from_secs(u64::MAX)));
        measure.tick();

        assert_eq!(target.bucket().host_sizes(), vec![1]);
    }
}
