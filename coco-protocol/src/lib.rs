//! The collectd binary network protocol.
//!
//! A collectd datagram is a flat sequence of *parts*. Every part starts with a 2-byte type code
//! and a 2-byte length, both big-endian, where the length includes the 4-byte header itself:
//!
//! ```text
//! +--------+--------+-----------------------+
//! |  type  | length |  payload (length - 4) |
//! +--------+--------+-----------------------+
//! ```
//!
//! String parts (host, plugin, type and their instances) carry NUL-terminated UTF-8, numeric parts
//! (times and intervals) a single 64-bit big-endian integer. The values part closes a data set:
//! every time it is encountered, the fields seen so far are emitted as one [`Packet`]. Fields
//! persist across values parts, so a single datagram can carry many packets without any outer
//! framing.
//!
//! This crate decodes such datagrams with [`decode`], validates values against a
//! [`TypesDb`] and produces the exact wire representation of a packet with [`encode`].
//!
//! ```
//! use coco_protocol::{Packet, TypesDb, Value, decode, encode};
//!
//! let types: TypesDb = "load shortterm:GAUGE:0:5000".parse().unwrap();
//! let packet = Packet {
//!     host: "web-01".to_owned(),
//!     plugin: "load".to_owned(),
//!     type_name: "load".to_owned(),
//!     values: vec![Value::Gauge(0.25)],
//!     ..Packet::default()
//! };
//!
//! let bytes = encode(&packet).unwrap();
//! assert_eq!(decode(&bytes, &types).unwrap(), vec![packet]);
//! ```
#![warn(missing_docs)]

mod decode;
mod encode;
mod name;
mod packet;
mod types_db;

pub use self::decode::*;
pub use self::encode::*;
pub use self::name::*;
pub use self::packet::*;
pub use self::types_db::*;
