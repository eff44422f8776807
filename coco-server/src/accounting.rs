//! Per-target bookkeeping of the hosts and metric names seen by the router.
//!
//! Every target owns a [`Bucket`] that maps host names to the metric names forwarded for that
//! host, each with the UNIX timestamp of its last successful forward. Rejected packets are
//! recorded the same way in a separate `filtered` bucket.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::tier::Tiers;

/// Metric names with the UNIX timestamp of their last occurrence, grouped by host.
pub type HostMap = BTreeMap<String, BTreeMap<String, i64>>;

#[derive(Debug, Default)]
struct BucketInner {
    hosts: HostMap,
    metrics: usize,
}

/// Number of distinct hosts and metrics in a [`Bucket`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BucketStats {
    /// Distinct hosts.
    pub hosts: usize,
    /// Distinct metric names summed over all hosts.
    pub metrics: usize,
}

/// A shared, concurrently updated accounting map.
#[derive(Clone, Debug, Default)]
pub struct Bucket(Arc<Mutex<BucketInner>>);

impl Bucket {
    /// Creates an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `metric` of `host` was seen at `timestamp`.
    pub fn record(&self, host: &str, metric: &str, timestamp: i64) -> BucketStats {
        let mut inner = self.0.lock();
        let inner = &mut *inner;

        let metrics = inner.hosts.entry(host.to_owned()).or_default();

        match metrics.get_mut(metric) {
            Some(last_seen) => *last_seen = timestamp,
            None => {
                metrics.insert(metric.to_owned(), timestamp);
                inner.metrics += 1;
            }
        }

        BucketStats {
            hosts: inner.hosts.len(),
            metrics: inner.metrics,
        }
    }

    /// Returns the number of distinct hosts and metrics.
    pub fn stats(&self) -> BucketStats {
        let inner = self.0.lock();
        BucketStats {
            hosts: inner.hosts.len(),
            metrics: inner.metrics,
        }
    }

    /// Returns the number of metric names recorded for every host.
    pub fn host_sizes(&self) -> Vec<i64> {
        let inner = self.0.lock();
        inner.hosts.values().map(|m| m.len() as i64).collect()
    }

    /// Returns the number of metric names recorded for `host`.
    pub fn host_size(&self, host: &str) -> usize {
        self.0.lock().hosts.get(host).map_or(0, BTreeMap::len)
    }

    /// Returns a copy of the map.
    pub fn snapshot(&self) -> HostMap {
        self.0.lock().hosts.clone()
    }

    /// Removes all entries last seen before `cutoff` and returns how many were removed.
    ///
    /// Hosts without remaining entries are removed as well.
    pub fn sweep(&self, cutoff: i64) -> usize {
        let mut inner = self.0.lock();
        let before = inner.metrics;

        inner.hosts.retain(|_, metrics| {
            metrics.retain(|_, last_seen| *last_seen >= cutoff);
            !metrics.is_empty()
        });
        inner.metrics = inner.hosts.values().map(BTreeMap::len).sum();

        before - inner.metrics
    }
}

/// Serialized form of [`Accounting`], served by the introspection API.
#[derive(Debug, Serialize)]
pub struct AccountingSnapshot {
    /// Metrics rejected by the blacklist.
    pub filtered: HostMap,
    /// Metrics forwarded to each target, keyed by target address.
    pub targets: BTreeMap<String, HostMap>,
}

/// The accounting buckets of all targets and the filter.
#[derive(Debug)]
pub struct Accounting {
    filtered: Bucket,
    targets: BTreeMap<String, Bucket>,
}

impl Accounting {
    /// Collects the buckets of all targets in `tiers`.
    ///
    /// Targets shared between tiers appear once.
    pub fn new(tiers: &Tiers) -> Self {
        let targets = tiers
            .iter()
            .flat_map(|tier| tier.targets())
            .map(|target| (target.addr().to_owned(), target.bucket().clone()))
            .collect();

        Self {
            filtered: Bucket::new(),
            targets,
        }
    }

    /// Returns the bucket recording rejected metrics.
    pub fn filtered(&self) -> &Bucket {
        &self.filtered
    }

    /// Returns the bucket of the target with the given address.
    pub fn target(&self, addr: &str) -> Option<&Bucket> {
        self.targets.get(addr)
    }

    /// Evicts entries last seen before `cutoff` from all buckets.
    pub fn sweep(&self, cutoff: i64) -> usize {
        let targets: usize = self.targets.values().map(|b| b.sweep(cutoff)).sum();
        targets + self.filtered.sweep(cutoff)
    }

    /// Returns a copy of all buckets.
    pub fn snapshot(&self) -> AccountingSnapshot {
        AccountingSnapshot {
            filtered: self.filtered.snapshot(),
            targets: self
                .targets
                .iter()
                .map(|(addr, bucket)| (addr.clone(), bucket.snapshot()))
                .collect(),
        }
    }
}
