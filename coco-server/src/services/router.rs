//! Forwarding of accepted packets to the tiers.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::BytesMut;
use chrono::Utc;
use coco_protocol::{Packet, encode_into};
use coco_telemetry::Registry;
use crossbeam_channel::Receiver;

use crate::counters::{ErrorCounters, SendCounters};
use crate::tier::{LookupError, Tiers};

/// A fatal routing failure.
///
/// Rings are fixed after startup, so a lookup can only fail if the routing state is corrupt.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// A shard lookup failed after the rings were built.
    #[error("shard lookup failed")]
    Lookup(#[from] LookupError),
}

/// Forwards accepted packets to one target of every tier.
#[derive(Debug)]
pub struct Router {
    tiers: Arc<Tiers>,
    registry: Arc<Registry>,
    buf: BytesMut,
}

impl Router {
    /// Creates a router over the given tiers.
    pub fn new(tiers: Arc<Tiers>, registry: Arc<Registry>) -> Self {
        registry.declare(ErrorCounters::SendWrite);
        registry.declare(ErrorCounters::SendUnhandled);

        Self {
            tiers,
            registry,
            buf: BytesMut::with_capacity(1452),
        }
    }

    /// Encodes a packet once and sends it to the responsible target of every tier.
    ///
    /// A failed write skips the tier for this packet and is counted for the target. Returns the
    /// number of targets the packet was delivered to.
    pub fn route(&mut self, packet: &Packet) -> Result<usize, RouterError> {
        self.buf.clear();
        if let Err(error) = encode_into(packet, &mut self.buf) {
            coco_log::debug!(
                host = %packet.host,
                error = &error as &dyn std::error::Error,
                "failed to encode packet"
            );
            self.registry.count(ErrorCounters::SendEncode, 1);
            return Ok(0);
        }

        let metric = packet.metric_name();
        let now = Utc::now().timestamp();
        let mut delivered = 0;

        for tier in self.tiers.iter() {
            let target = tier.lookup(&packet.host)?;

            if let Err(error) = target.send(&self.buf) {
                coco_log::debug!(
                    tier = tier.name(),
                    error = &error as &dyn std::error::Error,
                    "failed to send packet to {}",
                    target.addr()
                );
                self.registry.count(ErrorCounters::SendWrite, 1);
                continue;
            }

            let stats = target.bucket().record(&packet.host, &metric, now);
            target.update_gauges(stats);
            self.registry.count(SendCounters::Total, 1);
            delivered += 1;
        }

        Ok(delivered)
    }

    /// Routes packets from `rx` until the queue is closed or routing fails fatally.
    ///
    /// A panic while routing a packet is counted and the packet is dropped.
    pub fn run(mut self, rx: Receiver<Packet>) -> Result<(), RouterError> {
        for packet in rx {
            match panic::catch_unwind(AssertUnwindSafe(|| self.route(&packet))) {
                Ok(Ok(_)) => (),
                Ok(Err(error)) => return Err(error),
                Err(_) => {
                    coco_log::error!(host = %packet.host, "router panicked while handling packet");
                    self.registry.count(ErrorCounters::SendUnhandled, 1);
                }
            }
        }

        Ok(())
    }
}
