//! State shared with the introspection API.

use std::sync::Arc;

use coco_telemetry::Registry;

use crate::accounting::Accounting;
use crate::tier::Tiers;

/// Shared state of the introspection API.
///
/// The API only reads the routing state. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct ServiceState {
    tiers: Arc<Tiers>,
    accounting: Arc<Accounting>,
    registry: Arc<Registry>,
}

impl ServiceState {
    /// Creates the state from the routing tiers, accounting and counters.
    pub fn new(tiers: Arc<Tiers>, accounting: Arc<Accounting>, registry: Arc<Registry>) -> Self {
        Self {
            tiers,
            accounting,
            registry,
        }
    }

    /// Returns the routing tiers.
    pub fn tiers(&self) -> &Tiers {
        &self.tiers
    }

    /// Returns the accounting buckets of all targets.
    pub fn accounting(&self) -> &Accounting {
        &self.accounting
    }

    /// Returns the counter registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
