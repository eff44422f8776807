//! Fixed counters and gauges of the pipeline stages.

use coco_telemetry::{CounterMetric, GaugeMetric, Subsystem};

/// Counters of the UDP listener.
pub enum ListenCounters {
    /// Number of datagrams read from the socket.
    Raw,
    /// Number of packets decoded from those datagrams.
    Decoded,
}

impl CounterMetric for ListenCounters {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Listen
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Decoded => "decoded",
        }
    }
}

/// Counters of the blacklist filter.
pub enum FilterCounters {
    /// Packets passed on to the router.
    Accepted,
    /// Packets matching the blacklist.
    Rejected,
}

impl CounterMetric for FilterCounters {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Filter
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// Counters of the tier router.
///
/// Per-target counts are recorded with dynamic keys under [`Subsystem::Send`].
pub enum SendCounters {
    /// Datagrams forwarded to any target.
    Total,
}

impl CounterMetric for SendCounters {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Send
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Total => "total",
        }
    }
}

/// Faults of all pipeline stages.
pub enum ErrorCounters {
    /// Reading from the listen socket failed.
    FetchReceive,
    /// A datagram could not be decoded.
    FetchDecode,
    /// The filter panicked on a packet.
    FilterUnhandled,
    /// A target could not be dialed at startup.
    SendDial,
    /// Writing to a target failed.
    SendWrite,
    /// The router panicked on a packet.
    SendUnhandled,
    /// A packet could not be encoded for forwarding.
    SendEncode,
    /// A shard lookup from the API failed.
    LookupHashGet,
}

impl CounterMetric for ErrorCounters {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Errors
    }

    fn name(&self) -> &'static str {
        match self {
            Self::FetchReceive => "fetch.receive",
            Self::FetchDecode => "fetch.decode",
            Self::FilterUnhandled => "filter.unhandled",
            Self::SendDial => "send.dial",
            Self::SendWrite => "send.write",
            Self::SendUnhandled => "send.unhandled",
            Self::SendEncode => "send.encode",
            Self::LookupHashGet => "lookup.hash.get",
        }
    }
}

/// Depths of the queues between the pipeline stages, sampled by the measure service.
#[derive(Clone, Copy, Debug)]
pub enum QueueGauges {
    /// Decoded packets waiting for a filter worker.
    Raw,
    /// Accepted packets waiting for the router.
    Filtered,
}

impl GaugeMetric for QueueGauges {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Queues
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Filtered => "filtered",
        }
    }
}
