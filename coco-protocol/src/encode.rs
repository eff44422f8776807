use bytes::{BufMut, Bytes, BytesMut};

use crate::{PART_HEADER_SIZE, Packet, PartType};

/// The maximum number of values that fit into a single values part.
const MAX_VALUES: usize = (u16::MAX as usize - PART_HEADER_SIZE - 2) / 9;

/// An error raised while encoding a packet.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum EncodeError {
    /// A string field does not fit into a single part.
    #[error("{part:?} part exceeds the maximum length with {length} bytes")]
    StringTooLong {
        /// The part that overflowed.
        part: PartType,
        /// Length of the string in bytes.
        length: usize,
    },
    /// The packet carries more values than fit into a single part.
    #[error("too many values: {0}")]
    TooManyValues(usize),
    /// The packet carries no values.
    #[error("packet has no values")]
    EmptyValues,
}

fn put_header(buf: &mut BytesMut, part: PartType, length: usize) {
    buf.put_u16(part.code());
    // Callers check the length against u16::MAX.
    buf.put_u16(length as u16);
}

fn put_string(buf: &mut BytesMut, part: PartType, value: &str) -> Result<(), EncodeError> {
    let length = value.len() + PART_HEADER_SIZE + 1;
    if length > usize::from(u16::MAX) {
        return Err(EncodeError::StringTooLong {
            part,
            length: value.len(),
        });
    }

    put_header(buf, part, length);
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn put_number(buf: &mut BytesMut, part: PartType, value: Option<u64>) {
    if let Some(value) = value.filter(|&v| v > 0) {
        put_header(buf, part, PART_HEADER_SIZE + 8);
        buf.put_u64(value);
    }
}

/// Appends the wire representation of a packet to `buf`.
///
/// Parts are written in a fixed order: host, time, high-resolution time, interval,
/// high-resolution interval, plugin, plugin instance, type, type instance and values. Unset times
/// and intervals as well as empty instances are omitted. Plugin and type are always written.
///
/// On error, `buf` may contain a partially written packet.
pub fn encode_into(packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let count = packet.values.len();
    if count == 0 {
        return Err(EncodeError::EmptyValues);
    }
    if count > MAX_VALUES {
        return Err(EncodeError::TooManyValues(count));
    }

    put_string(buf, PartType::Host, &packet.host)?;
    put_number(buf, PartType::Time, packet.time);
    put_number(buf, PartType::TimeHr, packet.time_hr);
    put_number(buf, PartType::Interval, packet.interval);
    put_number(buf, PartType::IntervalHr, packet.interval_hr);
    put_string(buf, PartType::Plugin, &packet.plugin)?;
    if !packet.plugin_instance.is_empty() {
        put_string(buf, PartType::PluginInstance, &packet.plugin_instance)?;
    }
    put_string(buf, PartType::Type, &packet.type_name)?;
    if !packet.type_instance.is_empty() {
        put_string(buf, PartType::TypeInstance, &packet.type_instance)?;
    }

    put_header(buf, PartType::Values, PART_HEADER_SIZE + 2 + 9 * count);
    buf.put_u16(count as u16);
    for value in &packet.values {
        buf.put_u8(value.kind().tag());
    }
    for value in &packet.values {
        buf.put_slice(&value.to_wire_bytes());
    }

    Ok(())
}

/// Encodes a packet into a standalone datagram.
///
/// See [`encode_into`] for the layout.
pub fn encode(packet: &Packet) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(encoded_size_hint(packet));
    encode_into(packet, &mut buf)?;
    Ok(buf.freeze())
}

fn encoded_size_hint(packet: &Packet) -> usize {
    let strings = [
        &packet.host,
        &packet.plugin,
        &packet.plugin_instance,
        &packet.type_name,
        &packet.type_instance,
    ];

    let strings: usize = strings.iter().map(|s| s.len() + PART_HEADER_SIZE + 1).sum();
    strings + 4 * (PART_HEADER_SIZE + 8) + PART_HEADER_SIZE + 2 + 9 * packet.values.len()
}
