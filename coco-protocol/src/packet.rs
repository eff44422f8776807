use std::fmt;

/// Type codes of the parts that make up a datagram.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum PartType {
    /// Host name of the machine that produced the values.
    Host = 0x0000,
    /// Timestamp in seconds since the UNIX epoch.
    Time = 0x0001,
    /// Plugin name, for example `cpu`.
    Plugin = 0x0002,
    /// Plugin instance, for example the CPU number.
    PluginInstance = 0x0003,
    /// Type name, referring to an entry in `types.db`.
    Type = 0x0004,
    /// Type instance, for example `idle`.
    TypeInstance = 0x0005,
    /// The values of a data set. Completes a packet.
    Values = 0x0006,
    /// Sample interval in seconds.
    Interval = 0x0007,
    /// Timestamp in units of 2<sup>-30</sup> seconds.
    TimeHr = 0x0008,
    /// Sample interval in units of 2<sup>-30</sup> seconds.
    IntervalHr = 0x0009,
    /// Notification message. Not forwarded.
    Message = 0x0100,
    /// Notification severity. Not forwarded.
    Severity = 0x0101,
    /// HMAC-SHA-256 signature over the rest of the datagram.
    Signature = 0x0200,
    /// AES-256 encrypted payload.
    Encryption = 0x0210,
}

impl PartType {
    /// Returns the part type for a wire type code.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x0000 => Self::Host,
            0x0001 => Self::Time,
            0x0002 => Self::Plugin,
            0x0003 => Self::PluginInstance,
            0x0004 => Self::Type,
            0x0005 => Self::TypeInstance,
            0x0006 => Self::Values,
            0x0007 => Self::Interval,
            0x0008 => Self::TimeHr,
            0x0009 => Self::IntervalHr,
            0x0100 => Self::Message,
            0x0101 => Self::Severity,
            0x0200 => Self::Signature,
            0x0210 => Self::Encryption,
            _ => return None,
        })
    }

    /// Returns the wire type code.
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// The data source type of a single value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    /// Monotonically increasing unsigned counter.
    Counter = 0,
    /// Absolute measurement, encoded as little-endian IEEE-754 double.
    Gauge = 1,
    /// Signed counter that may decrease.
    Derive = 2,
    /// Unsigned counter that is reset on every read.
    Absolute = 3,
}

impl ValueKind {
    /// Returns the kind for a wire type tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Counter,
            1 => Self::Gauge,
            2 => Self::Derive,
            3 => Self::Absolute,
            _ => return None,
        })
    }

    /// Returns the wire type tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Returns the upper-case name used in `types.db`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "COUNTER",
            Self::Gauge => "GAUGE",
            Self::Derive => "DERIVE",
            Self::Absolute => "ABSOLUTE",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed value of a data set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    /// See [`ValueKind::Counter`].
    Counter(u64),
    /// See [`ValueKind::Gauge`].
    Gauge(f64),
    /// See [`ValueKind::Derive`].
    Derive(i64),
    /// See [`ValueKind::Absolute`].
    Absolute(u64),
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Counter(_) => ValueKind::Counter,
            Self::Gauge(_) => ValueKind::Gauge,
            Self::Derive(_) => ValueKind::Derive,
            Self::Absolute(_) => ValueKind::Absolute,
        }
    }

    /// Returns the 8 bytes this value occupies on the wire.
    ///
    /// Gauges are little-endian doubles, all other kinds big-endian integers.
    pub fn to_wire_bytes(&self) -> [u8; 8] {
        match *self {
            Self::Counter(v) | Self::Absolute(v) => v.to_be_bytes(),
            Self::Gauge(v) => v.to_le_bytes(),
            Self::Derive(v) => v.to_be_bytes(),
        }
    }

    /// Reads a value of the given kind from its wire bytes.
    pub fn from_wire_bytes(kind: ValueKind, bytes: [u8; 8]) -> Self {
        match kind {
            ValueKind::Counter => Self::Counter(u64::from_be_bytes(bytes)),
            ValueKind::Gauge => Self::Gauge(f64::from_le_bytes(bytes)),
            ValueKind::Derive => Self::Derive(i64::from_be_bytes(bytes)),
            ValueKind::Absolute => Self::Absolute(u64::from_be_bytes(bytes)),
        }
    }
}

/// A decoded collectd data set.
///
/// The host name and at least one value are always present in packets produced by [`decode`].
/// Empty instances and missing times or intervals are not transmitted.
///
/// [`decode`]: crate::decode
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Packet {
    /// Host name of the machine that produced the values.
    pub host: String,
    /// Timestamp in seconds.
    pub time: Option<u64>,
    /// Timestamp in units of 2<sup>-30</sup> seconds.
    pub time_hr: Option<u64>,
    /// Sample interval in seconds.
    pub interval: Option<u64>,
    /// Sample interval in units of 2<sup>-30</sup> seconds.
    pub interval_hr: Option<u64>,
    /// Name of the plugin that collected the values.
    pub plugin: String,
    /// Plugin instance, empty if not set.
    pub plugin_instance: String,
    /// Name of the type in `types.db`.
    pub type_name: String,
    /// Type instance, empty if not set.
    pub type_instance: String,
    /// The values of this data set, in the order defined by the type.
    pub values: Vec<Value>,
}
