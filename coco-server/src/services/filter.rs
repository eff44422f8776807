//! Blacklist filtering of decoded packets.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use coco_protocol::Packet;
use coco_telemetry::Registry;
use crossbeam_channel::Receiver;
use regex::Regex;

use crate::accounting::Bucket;
use crate::counters::{ErrorCounters, FilterCounters};
use crate::queue::{QueueClosed, QueueSender};

/// A compiled blacklist pattern.
///
/// Without a pattern, every name is accepted.
#[derive(Clone, Debug, Default)]
pub struct Blacklist(Option<Regex>);

impl Blacklist {
    /// Compiles the pattern once.
    pub fn new(pattern: Option<&str>) -> Result<Self, regex::Error> {
        pattern.map(Regex::new).transpose().map(Self)
    }

    /// Returns `true` if the name matches the blacklist.
    pub fn is_match(&self, name: &str) -> bool {
        self.0.as_ref().is_some_and(|regex| regex.is_match(name))
    }
}

/// Decision of the filter for a single packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// The packet is forwarded.
    Accept,
    /// The packet matched the blacklist and is dropped.
    Reject,
}

/// Drops packets whose qualified name matches the blacklist.
///
/// Clones share the compiled pattern, the `filtered` accounting bucket and the registry, so any
/// number of workers can run the same filter.
#[derive(Clone, Debug)]
pub struct FilterService {
    blacklist: Arc<Blacklist>,
    filtered: Bucket,
    registry: Arc<Registry>,
}

impl FilterService {
    /// Creates a new filter recording rejected metrics in `filtered`.
    pub fn new(blacklist: Blacklist, filtered: Bucket, registry: Arc<Registry>) -> Self {
        registry.declare(ErrorCounters::FilterUnhandled);

        Self {
            blacklist: Arc::new(blacklist),
            filtered,
            registry,
        }
    }

    /// Evaluates the blacklist against `host/metric-name` of the packet.
    pub fn evaluate(&self, packet: &Packet) -> Verdict {
        if self.blacklist.is_match(&packet.qualified_name()) {
            Verdict::Reject
        } else {
            Verdict::Accept
        }
    }

    /// Evaluates a packet, updating counters and recording rejections.
    pub fn handle(&self, packet: &Packet) -> Verdict {
        let verdict = self.evaluate(packet);

        match verdict {
            Verdict::Accept => self.registry.count(FilterCounters::Accepted, 1),
            Verdict::Reject => {
                let now = Utc::now().timestamp();
                self.filtered
                    .record(&packet.host, &packet.metric_name(), now);
                self.registry.count(FilterCounters::Rejected, 1);
            }
        }

        verdict
    }

    /// Filters packets from `rx` into `tx` until either queue is closed.
    ///
    /// A panic while handling a packet is counted and the packet is dropped. The worker carries on
    /// with the next packet.
    pub fn run(self, rx: Receiver<Packet>, tx: QueueSender<Packet>) -> Result<(), QueueClosed> {
        self.run_with(rx, tx, Self::handle)
    }

    fn run_with<F>(
        &self,
        rx: Receiver<Packet>,
        tx: QueueSender<Packet>,
        handle: F,
    ) -> Result<(), QueueClosed>
    where
        F: Fn(&Self, &Packet) -> Verdict,
    {
        for packet in rx {
            match panic::catch_unwind(AssertUnwindSafe(|| handle(self, &packet))) {
                Ok(Verdict::Accept) => tx.send(packet)?,
                Ok(Verdict::Reject) => (),
                Err(_) => {
                    coco_log::error!(host = %packet.host, "filter panicked while handling packet");
                    self.registry.count(ErrorCounters::FilterUnhandled, 1);
                }
            }
        }

        Ok(())
    }
}
