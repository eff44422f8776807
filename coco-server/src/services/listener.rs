//! The UDP listener.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use coco_protocol::{Packet, TypesDb, decode};
use coco_telemetry::Registry;

use crate::counters::{ErrorCounters, ListenCounters};
use crate::queue::{QueueClosed, QueueSender};

/// Reads collectd datagrams from a UDP socket and decodes them.
#[derive(Debug)]
pub struct Listener {
    socket: UdpSocket,
    types: Arc<TypesDb>,
    registry: Arc<Registry>,
    max_datagram_size: usize,
}

impl Listener {
    /// Binds the listen socket.
    pub fn bind(
        addr: SocketAddr,
        types: Arc<TypesDb>,
        registry: Arc<Registry>,
        max_datagram_size: usize,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;

        registry.declare(ErrorCounters::FetchReceive);
        registry.declare(ErrorCounters::FetchDecode);

        Ok(Self {
            socket,
            types,
            registry,
            max_datagram_size,
        })
    }

    /// Returns the address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Decodes a single datagram and enqueues all packets it contains.
    ///
    /// Datagrams that fail to decode are counted and discarded as a whole.
    pub fn handle(&self, datagram: &[u8], tx: &QueueSender<Packet>) -> Result<(), QueueClosed> {
        self.registry.count(ListenCounters::Raw, 1);

        let packets = match decode(datagram, &self.types) {
            Ok(packets) => packets,
            Err(error) => {
                coco_log::debug!(
                    error = &error as &dyn std::error::Error,
                    "failed to decode datagram"
                );
                self.registry.count(ErrorCounters::FetchDecode, 1);
                return Ok(());
            }
        };

        self.registry
            .count(ListenCounters::Decoded, packets.len() as i64);

        for packet in packets {
            tx.send(packet)?;
        }

        Ok(())
    }

    /// Receives datagrams until the downstream queue is closed.
    pub fn run(self, tx: QueueSender<Packet>) -> Result<(), QueueClosed> {
        let mut buf = vec![0; self.max_datagram_size];

        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, _)) => self.handle(&buf[..len], &tx)?,
                Err(error) => {
                    coco_log::debug!(
                        error = &error as &dyn std::error::Error,
                        "failed to receive datagram"
                    );
                    self.registry.count(ErrorCounters::FetchReceive, 1);
                }
            }
        }
    }
}
