//! An in-process registry of counters and gauges.
//!
//! Unlike a StatsD client, the [`Registry`] keeps the current value of every metric in memory so
//! that it can be dumped on request. It is an explicitly owned object: components receive an
//! `Arc<Registry>` at construction and never reach for global state.
//!
//! ## Defining Metrics
//!
//! Fixed metrics are declared as enums implementing [`CounterMetric`] or [`GaugeMetric`]. The
//! traits only provide a type safe name and the [`Subsystem`] the metric belongs to:
//!
//! ```
//! use coco_telemetry::{CounterMetric, Registry, Subsystem};
//!
//! enum ListenCounters {
//!     Raw,
//!     Decoded,
//! }
//!
//! impl CounterMetric for ListenCounters {
//!     fn subsystem(&self) -> Subsystem {
//!         Subsystem::Listen
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         match self {
//!             Self::Raw => "raw",
//!             Self::Decoded => "decoded",
//!         }
//!     }
//! }
//!
//! let registry = Registry::new();
//! registry.count(ListenCounters::Raw, 1);
//! registry.count(ListenCounters::Decoded, 3);
//!
//! assert_eq!(registry.get(Subsystem::Listen, "decoded"), Some(3));
//! ```
//!
//! ## Dynamic Keys
//!
//! Metrics keyed by runtime values, such as target addresses or tier names, are recorded with
//! [`Registry::add`] and [`Registry::set`]. For hot paths, [`Registry::handle`] returns a cheap
//! handle to a single value that skips the map lookup.
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

/// Groups of related metrics, rendered as the top-level keys of a [`Snapshot`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Subsystem {
    /// Datagrams received and decoded by the listener.
    Listen,
    /// Accept and reject decisions of the blacklist.
    Filter,
    /// Forwarded datagrams, per target and in total.
    Send,
    /// Failed writes, per target.
    SendErrors,
    /// Number of distinct metric names seen per target.
    HashMetrics,
    /// Number of distinct hosts seen per target.
    HashHosts,
    /// Metrics-per-host summaries per tier.
    HashRatios,
    /// Successful shard lookups per tier.
    Lookup,
    /// Depth of the internal queues.
    Queues,
    /// Faults of all stages.
    Errors,
}

impl Subsystem {
    /// Returns the name of the subsystem as shown in snapshots.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Listen => "listen",
            Self::Filter => "filter",
            Self::Send => "send",
            Self::SendErrors => "send.errors",
            Self::HashMetrics => "hash.metrics",
            Self::HashHosts => "hash.hosts",
            Self::HashRatios => "hash.ratios",
            Self::Lookup => "lookup",
            Self::Queues => "queues",
            Self::Errors => "errors",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric for counting events.
///
/// Counters only ever grow. See the [crate-level documentation](self) for an example.
pub trait CounterMetric {
    /// Returns the subsystem this counter is grouped under.
    fn subsystem(&self) -> Subsystem;

    /// Returns the name of the counter within its subsystem.
    fn name(&self) -> &'static str;
}

/// A metric for capturing a current value.
///
/// Gauges are overwritten on every update, for example with the depth of a queue.
pub trait GaugeMetric {
    /// Returns the subsystem this gauge is grouped under.
    fn subsystem(&self) -> Subsystem;

    /// Returns the name of the gauge within its subsystem.
    fn name(&self) -> &'static str;
}

/// Distribution of a set of samples, such as the number of metrics per host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Summary {
    /// The smallest sample.
    pub min: i64,
    /// The largest sample.
    pub max: i64,
    /// The arithmetic mean of all samples.
    pub avg: f64,
    /// The 95th percentile, taken as the sample at index `floor(len * 0.95)` of the sorted list.
    #[serde(rename = "95e")]
    pub p95: i64,
}

impl Summary {
    /// Computes the summary of the given samples.
    ///
    /// Returns `None` if there are no samples.
    pub fn from_samples(mut samples: Vec<i64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        samples.sort_unstable();

        let len = samples.len();
        let sum: i64 = samples.iter().sum();
        let p95 = ((len as f64 * 0.95) as usize).min(len - 1);

        Some(Self {
            min: samples[0],
            max: samples[len - 1],
            avg: sum as f64 / len as f64,
            p95: samples[p95],
        })
    }
}

/// A shared handle to a single value in the [`Registry`].
#[derive(Clone, Debug)]
pub struct Handle(Arc<AtomicI64>);

impl Handle {
    /// Adds `delta` to the value.
    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Overwrites the value.
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

type Values = BTreeMap<Subsystem, BTreeMap<String, Arc<AtomicI64>>>;

/// Registry of all counters and gauges of the process.
#[derive(Debug, Default)]
pub struct Registry {
    values: RwLock<Values>,
    summaries: RwLock<BTreeMap<String, Summary>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the value, creating it with zero if it does not exist.
    pub fn handle(&self, subsystem: Subsystem, key: &str) -> Handle {
        if let Some(value) = self.values.read().get(&subsystem).and_then(|g| g.get(key)) {
            return Handle(Arc::clone(value));
        }

        let mut values = self.values.write();
        let value = values
            .entry(subsystem)
            .or_default()
            .entry(key.to_owned())
            .or_default();

        Handle(Arc::clone(value))
    }

    /// Adds `delta` to a dynamically keyed counter.
    pub fn add(&self, subsystem: Subsystem, key: &str, delta: i64) {
        self.handle(subsystem, key).add(delta);
    }

    /// Sets a dynamically keyed gauge.
    pub fn set(&self, subsystem: Subsystem, key: &str, value: i64) {
        self.handle(subsystem, key).set(value);
    }

    /// Adds `delta` to a counter.
    pub fn count<M: CounterMetric>(&self, metric: M, delta: i64) {
        self.add(metric.subsystem(), metric.name(), delta);
    }

    /// Sets a gauge.
    pub fn gauge<M: GaugeMetric>(&self, metric: M, value: i64) {
        self.set(metric.subsystem(), metric.name(), value);
    }

    /// Ensures a counter exists, so that it is part of snapshots before its first increment.
    pub fn declare<M: CounterMetric>(&self, metric: M) {
        self.handle(metric.subsystem(), metric.name());
    }

    /// Returns the current value of a counter or gauge, if it exists.
    pub fn get(&self, subsystem: Subsystem, key: &str) -> Option<i64> {
        let values = self.values.read();
        let value = values.get(&subsystem)?.get(key)?;
        Some(value.load(Ordering::Relaxed))
    }

    /// Replaces the summary stored for `key` in [`Subsystem::HashRatios`].
    pub fn set_summary(&self, key: &str, summary: Summary) {
        self.summaries.write().insert(key.to_owned(), summary);
    }

    /// Returns the summary stored for `key`.
    pub fn summary(&self, key: &str) -> Option<Summary> {
        self.summaries.read().get(key).copied()
    }

    /// Captures the current values of all metrics.
    pub fn snapshot(&self) -> Snapshot {
        let mut groups = BTreeMap::new();

        for (subsystem, values) in self.values.read().iter() {
            let group: &mut BTreeMap<_, _> = groups.entry(subsystem.as_str()).or_default();
            for (key, value) in values {
                group.insert(key.clone(), Entry::Value(value.load(Ordering::Relaxed)));
            }
        }

        let summaries = self.summaries.read();
        if !summaries.is_empty() {
            let group = groups.entry(Subsystem::HashRatios.as_str()).or_default();
            for (key, summary) in summaries.iter() {
                group.insert(key.clone(), Entry::Summary(*summary));
            }
        }

        Snapshot(groups)
    }
}

/// A single value in a [`Snapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Entry {
    /// The value of a counter or gauge.
    Value(i64),
    /// A distribution summary.
    Summary(Summary),
}

/// A point-in-time copy of all values in a [`Registry`], grouped by subsystem.
///
/// Serializes as a nested object: `{"listen": {"raw": 12, ...}, ...}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<&'static str, BTreeMap<String, Entry>>);

impl Snapshot {
    /// Returns the entry for a key in the given subsystem.
    pub fn get(&self, subsystem: Subsystem, key: &str) -> Option<&Entry> {
        self.0.get(subsystem.as_str())?.get(key)
    }

    /// Returns the value of a counter or gauge.
    pub fn value(&self, subsystem: Subsystem, key: &str) -> Option<i64> {
        match self.get(subsystem, key)? {
            Entry::Value(value) => Some(*value),
            Entry::Summary(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    enum TestCounters {
        Unhandled,
    }

    impl CounterMetric for TestCounters {
        fn subsystem(&self) -> Subsystem {
            Subsystem::Errors
        }

        fn name(&self) -> &'static str {
            match self {
                Self::Unhandled => "filter.unhandled",
            }
        }
    }

    struct QueueDepth;

    impl GaugeMetric for QueueDepth {
        fn subsystem(&self) -> Subsystem {
            Subsystem::Queues
        }

        fn name(&self) -> &'static str {
            "raw"
        }
    }

    #[test]
    fn test_counters_accumulate() {
        let registry = Registry::new();
        registry.count(TestCounters::Unhandled, 1);
        registry.count(TestCounters::Unhandled, 2);
        registry.add(Subsystem::Send, "10.0.0.1:25826", 5);

        assert_eq!(registry.get(Subsystem::Errors, "filter.unhandled"), Some(3));
        assert_eq!(registry.get(Subsystem::Send, "10.0.0.1:25826"), Some(5));
        assert_eq!(registry.get(Subsystem::Send, "total"), None);
    }

    #[test]
    fn test_gauges_overwrite() {
        let registry = Registry::new();
        registry.gauge(QueueDepth, 10);
        registry.gauge(QueueDepth, 4);

        assert_eq!(registry.get(Subsystem::Queues, "raw"), Some(4));
    }

    #[test]
    fn test_declare() {
        let registry = Registry::new();
        registry.declare(TestCounters::Unhandled);

        assert_eq!(registry.get(Subsystem::Errors, "filter.unhandled"), Some(0));
    }

    #[test]
    fn test_handle_shares_value() {
        let registry = Registry::new();
        let handle = registry.handle(Subsystem::Send, "total");
        handle.add(2);
        registry.add(Subsystem::Send, "total", 1);

        assert_eq!(handle.get(), 3);
    }

    #[test]
    fn test_concurrent_updates() {
        let registry = Arc::new(Registry::new());

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.add(Subsystem::Filter, "accepted", 1);
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(registry.get(Subsystem::Filter, "accepted"), Some(4000));
    }

    #[test]
    fn test_summary() {
        assert_eq!(Summary::from_samples(vec![]), None);

        let summary = Summary::from_samples(vec![4, 1, 3, 2]).unwrap();
        assert_eq!(
            summary,
            Summary {
                min: 1,
                max: 4,
                avg: 2.5,
                p95: 4,
            }
        );

        let summary = Summary::from_samples((1..=100).collect()).unwrap();
        assert_eq!(summary.p95, 96);
        assert_eq!(summary.avg, 50.5);
    }

    #[test]
    fn test_snapshot_serialization() {
        let registry = Registry::new();
        registry.add(Subsystem::Listen, "raw", 7);
        registry.add(Subsystem::SendErrors, "10.0.0.2:25826", 1);
        registry.set_summary(
            "tier1",
            Summary {
                min: 1,
                max: 3,
                avg: 2.0,
                p95: 3,
            },
        );

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.value(Subsystem::Listen, "raw"), Some(7));
        assert_eq!(snapshot.value(Subsystem::HashRatios, "tier1"), None);

        insta::assert_snapshot!(serde_json::to_string(&snapshot).unwrap(), @r#"{"hash.ratios":{"tier1":{"min":1,"max":3,"avg":2.0,"95e":3}},"listen":{"raw":7},"send.errors":{"10.0.0.2:25826":1}}"#);
    }
}
