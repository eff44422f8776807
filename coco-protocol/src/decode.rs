use crate::{Packet, PartType, TypesDb, Value, ValueKind};

/// Size of the type and length header in front of every part.
pub const PART_HEADER_SIZE: usize = 4;

/// An error raised while decoding a datagram.
///
/// Decoding is all-or-nothing: a datagram with a single malformed part is discarded entirely.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The datagram ends within a part header.
    #[error("truncated part header at offset {offset}")]
    TruncatedHeader {
        /// Offset of the incomplete header.
        offset: usize,
    },
    /// The declared part length is smaller than the header or exceeds the datagram.
    #[error("invalid part length {length} at offset {offset}")]
    InvalidLength {
        /// Offset of the part.
        offset: usize,
        /// The declared length including the header.
        length: usize,
    },
    /// A string part is missing its NUL terminator.
    #[error("unterminated string at offset {offset}")]
    UnterminatedString {
        /// Offset of the part.
        offset: usize,
    },
    /// A string part does not contain valid UTF-8.
    #[error("invalid utf-8 string at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the part.
        offset: usize,
    },
    /// A numeric part does not carry exactly 8 bytes.
    #[error("numeric part at offset {offset} has {size} bytes, expected 8")]
    InvalidNumber {
        /// Offset of the part.
        offset: usize,
        /// Size of the payload.
        size: usize,
    },
    /// The size of a values part does not match its value count.
    #[error("values part at offset {offset} declares {count} values in {size} bytes")]
    InvalidValues {
        /// Offset of the part.
        offset: usize,
        /// The declared number of values.
        count: usize,
        /// Size of the payload.
        size: usize,
    },
    /// A values part without any value.
    #[error("empty values part at offset {offset}")]
    EmptyValues {
        /// Offset of the part.
        offset: usize,
    },
    /// A value is tagged with an unknown data source type.
    #[error("unknown value type {tag} at offset {offset}")]
    UnknownValueKind {
        /// Offset of the part.
        offset: usize,
        /// The unknown tag.
        tag: u8,
    },
    /// Values were sent before any host part.
    #[error("values without host at offset {offset}")]
    MissingHost {
        /// Offset of the values part.
        offset: usize,
    },
    /// The type of the data set is not defined in `types.db`.
    #[error("type {0:?} is not defined in types.db")]
    UnknownType(String),
    /// The number of values does not match the type definition.
    #[error("type {type_name:?} expects {expected} values, got {actual}")]
    ValueCountMismatch {
        /// The type of the data set.
        type_name: String,
        /// The number of data sources in `types.db`.
        expected: usize,
        /// The number of values received.
        actual: usize,
    },
    /// The kind of a value does not match the type definition.
    #[error("value {index} of type {type_name:?} must be {expected}, got {actual}")]
    ValueKindMismatch {
        /// The type of the data set.
        type_name: String,
        /// Position of the offending value.
        index: usize,
        /// The kind defined in `types.db`.
        expected: ValueKind,
        /// The kind received.
        actual: ValueKind,
    },
    /// The datagram is encrypted, which is not supported.
    #[error("encrypted datagrams are not supported")]
    Encrypted,
}

/// A raw part of a datagram.
struct Part<'a> {
    code: u16,
    offset: usize,
    payload: &'a [u8],
}

/// Splits a datagram into parts, validating the declared lengths.
struct Parts<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Parts<'a> {
    type Item = Result<Part<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset;
        let rest = &self.buf[offset..];
        if rest.is_empty() {
            return None;
        }

        let Some(header) = rest.get(..PART_HEADER_SIZE) else {
            self.offset = self.buf.len();
            return Some(Err(DecodeError::TruncatedHeader { offset }));
        };

        let code = u16::from_be_bytes([header[0], header[1]]);
        let length = usize::from(u16::from_be_bytes([header[2], header[3]]));

        if length < PART_HEADER_SIZE || length > rest.len() {
            self.offset = self.buf.len();
            return Some(Err(DecodeError::InvalidLength { offset, length }));
        }

        self.offset += length;
        Some(Ok(Part {
            code,
            offset,
            payload: &rest[PART_HEADER_SIZE..length],
        }))
    }
}

fn read_string(part: &Part<'_>) -> Result<String, DecodeError> {
    let offset = part.offset;
    let Some((0, string)) = part.payload.split_last() else {
        return Err(DecodeError::UnterminatedString { offset });
    };

    std::str::from_utf8(string)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8 { offset })
}

fn read_number(part: &Part<'_>) -> Result<Option<u64>, DecodeError> {
    let bytes: [u8; 8] = part
        .payload
        .try_into()
        .map_err(|_| DecodeError::InvalidNumber {
            offset: part.offset,
            size: part.payload.len(),
        })?;

    // Zero is how collectd spells "not set".
    Ok(Some(u64::from_be_bytes(bytes)).filter(|&n| n > 0))
}

fn read_values(part: &Part<'_>) -> Result<Vec<Value>, DecodeError> {
    let offset = part.offset;
    let payload = part.payload;

    let Some((count, body)) = payload.split_first_chunk::<2>() else {
        return Err(DecodeError::InvalidValues {
            offset,
            count: 0,
            size: payload.len(),
        });
    };

    let count = usize::from(u16::from_be_bytes(*count));
    if count == 0 {
        return Err(DecodeError::EmptyValues { offset });
    }
    if body.len() != count * 9 {
        return Err(DecodeError::InvalidValues {
            offset,
            count,
            size: payload.len(),
        });
    }

    let (tags, data) = body.split_at(count);
    tags.iter()
        .zip(data.chunks_exact(8))
        .map(|(&tag, chunk)| {
            let kind = ValueKind::from_tag(tag).ok_or(DecodeError::UnknownValueKind { offset, tag })?;
            let mut bytes = [0; 8];
            bytes.copy_from_slice(chunk);
            Ok(Value::from_wire_bytes(kind, bytes))
        })
        .collect()
}

fn check_values(type_name: &str, values: &[Value], types: &TypesDb) -> Result<(), DecodeError> {
    let Some(sources) = types.get(type_name) else {
        return Err(DecodeError::UnknownType(type_name.to_owned()));
    };

    if sources.len() != values.len() {
        return Err(DecodeError::ValueCountMismatch {
            type_name: type_name.to_owned(),
            expected: sources.len(),
            actual: values.len(),
        });
    }

    for (index, (source, value)) in sources.iter().zip(values).enumerate() {
        if source.kind != value.kind() {
            return Err(DecodeError::ValueKindMismatch {
                type_name: type_name.to_owned(),
                index,
                expected: source.kind,
                actual: value.kind(),
            });
        }
    }

    Ok(())
}

/// Decodes all packets contained in a datagram.
///
/// Every values part emits one packet carrying the host, plugin, type, time and interval fields
/// seen before it in the same datagram. Values are validated against the type definitions in
/// `types`. Notification and signature parts are skipped, as are part types unknown to this
/// implementation.
///
/// Returns an error if any part is truncated or malformed. In that case, no packets of the
/// datagram are returned.
pub fn decode(buf: &[u8], types: &TypesDb) -> Result<Vec<Packet>, DecodeError> {
    let mut packets = Vec::new();
    let mut current = Packet::default();

    let parts = Parts { buf, offset: 0 };
    for part in parts {
        let part = part?;

        match PartType::from_code(part.code) {
            Some(PartType::Host) => current.host = read_string(&part)?,
            Some(PartType::Time) => current.time = read_number(&part)?,
            Some(PartType::TimeHr) => current.time_hr = read_number(&part)?,
            Some(PartType::Interval) => current.interval = read_number(&part)?,
            Some(PartType::IntervalHr) => current.interval_hr = read_number(&part)?,
            Some(PartType::Plugin) => current.plugin = read_string(&part)?,
            Some(PartType::PluginInstance) => current.plugin_instance = read_string(&part)?,
            Some(PartType::Type) => current.type_name = read_string(&part)?,
            Some(PartType::TypeInstance) => current.type_instance = read_string(&part)?,
            Some(PartType::Values) => {
                if current.host.is_empty() {
                    return Err(DecodeError::MissingHost {
                        offset: part.offset,
                    });
                }

                let values = read_values(&part)?;
                check_values(&current.type_name, &values, types)?;

                packets.push(Packet {
                    host: current.host.clone(),
                    plugin: current.plugin.clone(),
                    plugin_instance: current.plugin_instance.clone(),
                    type_name: current.type_name.clone(),
                    type_instance: current.type_instance.clone(),
                    values,
                    ..current
                });
            }
            Some(PartType::Encryption) => return Err(DecodeError::Encrypted),
            Some(PartType::Message | PartType::Severity | PartType::Signature) | None => {}
        }
    }

    Ok(packets)
}
