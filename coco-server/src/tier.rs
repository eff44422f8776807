//! Tiers of backend targets and their hash rings.
//!
//! Ring members are not the target addresses themselves but *shadow keys*: the decimal index of
//! the target in the tier's configured list. The ring therefore only depends on the number and
//! order of targets, and a tier's shadow map resolves every key to its connected [`Target`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::sync::Arc;

use coco_telemetry::{Handle, Registry, Subsystem, Summary};

use crate::ServerError;
use crate::accounting::{Bucket, BucketStats};
use crate::counters::ErrorCounters;
use crate::ring::HashRing;
use crate::upstream::{Dialer, Upstream};

/// A failed shard lookup.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The tier's ring has no members.
    #[error("hash ring of tier {0} is empty")]
    EmptyRing(String),
    /// The ring returned a shadow key that maps to no target.
    #[error("shadow key {key} of tier {tier} does not resolve to a target")]
    UnknownShadowKey {
        /// Name of the tier.
        tier: String,
        /// The unresolved shadow key.
        key: String,
    },
}

/// A connected backend together with its accounting and counters.
///
/// Clones share the connection, so a target listed in several tiers is only dialed once.
#[derive(Clone)]
pub struct Target {
    addr: Arc<str>,
    upstream: Arc<dyn Upstream>,
    bucket: Bucket,
    sent: Handle,
    errors: Handle,
    hosts: Handle,
    metrics: Handle,
}

impl Target {
    /// Creates a target for an established connection.
    pub fn new(addr: &str, upstream: Arc<dyn Upstream>, registry: &Registry) -> Self {
        Self {
            addr: addr.into(),
            upstream,
            bucket: Bucket::new(),
            sent: registry.handle(Subsystem::Send, addr),
            errors: registry.handle(Subsystem::SendErrors, addr),
            hosts: registry.handle(Subsystem::HashHosts, addr),
            metrics: registry.handle(Subsystem::HashMetrics, addr),
        }
    }

    /// Returns the configured address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Returns the accounting bucket of this target.
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Sends a datagram and updates the per-target counters.
    pub fn send(&self, payload: &[u8]) -> io::Result<()> {
        match self.upstream.send(payload) {
            Ok(()) => {
                self.sent.add(1);
                Ok(())
            }
            Err(error) => {
                self.errors.add(1);
                Err(error)
            }
        }
    }

    /// Publishes the host and metric counts of the bucket as gauges.
    pub fn update_gauges(&self, stats: BucketStats) {
        self.hosts.set(stats.hosts as i64);
        self.metrics.set(stats.metrics as i64);
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("addr", &self.addr)
            .field("peer", &self.upstream.peer())
            .finish()
    }
}

/// Returns the ring member standing in for the target at `index` of a tier's target list.
///
/// Keys are the decimal index (`"0"`, `"1"`, ...). Placement therefore depends on list position
/// only, not on the address. The Go router keyed its ring with the single character at that code
/// point (`"\x00"`, `"\x01"`, ...), so host assignments differ from a Go deployment with the same
/// target lists.
fn shadow_key(index: usize) -> String {
    index.to_string()
}

/// A named routing domain with its own hash ring.
#[derive(Debug)]
pub struct Tier {
    name: String,
    ring: HashRing<String>,
    shadows: BTreeMap<String, Target>,
}

impl Tier {
    /// Creates an empty tier.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ring: HashRing::new(),
            shadows: BTreeMap::new(),
        }
    }

    /// Returns the name of the tier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of ring members.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` if no target of this tier could be connected.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Adds a target under the given shadow key.
    pub fn insert(&mut self, shadow_key: String, target: Target) {
        self.ring.add(shadow_key.clone());
        self.shadows.insert(shadow_key, target);
    }

    /// Returns the target responsible for `host`.
    pub fn lookup(&self, host: &str) -> Result<&Target, LookupError> {
        let key = self
            .ring
            .get(host)
            .ok_or_else(|| LookupError::EmptyRing(self.name.clone()))?;

        self.shadows
            .get(key)
            .ok_or_else(|| LookupError::UnknownShadowKey {
                tier: self.name.clone(),
                key: key.clone(),
            })
    }

    /// Returns all distinct targets of this tier.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        let mut seen = BTreeSet::new();
        self.shadows
            .values()
            .filter(move |&target| seen.insert(target.addr()))
    }

    /// Summarizes the number of metrics per host across all targets of this tier.
    pub fn ratio_summary(&self) -> Option<Summary> {
        let sizes = self
            .targets()
            .flat_map(|target| target.bucket().host_sizes())
            .collect();

        Summary::from_samples(sizes)
    }
}

/// All routable tiers, ordered by name.
#[derive(Debug, Default)]
pub struct Tiers {
    tiers: Vec<Tier>,
}

impl Tiers {
    /// Connects to all targets and builds the hash ring of every tier.
    ///
    /// Targets that cannot be dialed are logged, counted and left out of the ring. A target
    /// address listed in several tiers is dialed once and shared. Tiers without any connected
    /// target are excluded from routing.
    ///
    /// Returns [`ServerError::NoTargets`] if no tier has a connected target.
    pub fn build<'a, I>(
        config: I,
        dialer: &dyn Dialer,
        registry: &Registry,
    ) -> Result<Self, ServerError>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut connected = BTreeMap::<&str, Target>::new();
        let mut failed = BTreeSet::<&str>::new();
        let mut tiers = Vec::new();

        for (name, addrs) in config {
            let mut tier = Tier::new(name);

            for (index, addr) in addrs.iter().enumerate() {
                let addr = addr.as_str();

                let target = if let Some(target) = connected.get(addr) {
                    target.clone()
                } else if failed.contains(addr) {
                    continue;
                } else {
                    match dialer.dial(addr) {
                        Ok(upstream) => {
                            if upstream.peer().is_some_and(|peer| peer.ip().is_loopback()) {
                                coco_log::warn!(
                                    tier = name,
                                    "target {addr} is a loopback address, metrics may loop"
                                );
                            }

                            let target = Target::new(addr, upstream, registry);
                            connected.insert(addr, target.clone());
                            target
                        }
                        Err(error) => {
                            coco_log::error!(
                                tier = name,
                                error = &error as &dyn std::error::Error,
                                "failed to connect to target {addr}"
                            );
                            registry.count(ErrorCounters::SendDial, 1);
                            failed.insert(addr);
                            continue;
                        }
                    }
                };

                tier.insert(shadow_key(index), target);
            }

            if tier.is_empty() {
                coco_log::warn!("tier {name} has no reachable targets, excluding it from routing");
                continue;
            }

            let members: Vec<_> = tier.targets().map(Target::addr).collect();
            coco_log::info!(
                "tier {name} hash ring has {} members: {}",
                tier.len(),
                members.join(", ")
            );

            tiers.push(tier);
        }

        if tiers.is_empty() {
            return Err(ServerError::NoTargets);
        }

        Ok(Self { tiers })
    }

    /// Returns the number of routable tiers.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Returns `true` if there are no routable tiers.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Iterates over all routable tiers in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }

    /// Recomputes the metrics-per-host summary of every tier.
    pub fn refresh_ratios(&self, registry: &Registry) {
        for tier in &self.tiers {
            if let Some(summary) = tier.ratio_summary() {
                registry.set_summary(tier.name(), summary);
            }
        }
    }
}

impl FromIterator<Tier> for Tiers {
    fn from_iter<T: IntoIterator<Item = Tier>>(iter: T) -> Self {
        Self {
            tiers: iter.into_iter().collect(),
        }
    }
}
