//! Connections to backend targets.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

/// A connected backend that accepts encoded datagrams.
pub trait Upstream: fmt::Debug + Send + Sync {
    /// Returns the resolved address of the backend, if known.
    fn peer(&self) -> Option<SocketAddr>;

    /// Sends a single datagram.
    fn send(&self, payload: &[u8]) -> io::Result<()>;
}

/// Establishes [`Upstream`] connections to backend addresses.
pub trait Dialer {
    /// Connects to the given `host:port` address.
    fn dial(&self, addr: &str) -> io::Result<Arc<dyn Upstream>>;
}

/// A connected UDP socket.
#[derive(Debug)]
pub struct UdpUpstream {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpUpstream {
    /// Binds an ephemeral local port and connects it to `addr`.
    pub fn connect(addr: &str, write_timeout: Option<Duration>) -> io::Result<Self> {
        let peer = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve {addr}"),
            )
        })?;

        let socket = match peer {
            SocketAddr::V4(_) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?,
            SocketAddr::V6(_) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?,
        };
        socket.connect(peer)?;
        socket.set_write_timeout(write_timeout)?;

        Ok(Self { socket, peer })
    }
}

impl Upstream for UdpUpstream {
    fn peer(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn send(&self, payload: &[u8]) -> io::Result<()> {
        let sent = self.socket.send(payload)?;
        if sent != payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {sent} of {} bytes", payload.len()),
            ));
        }
        Ok(())
    }
}

/// Dials [`UdpUpstream`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct UdpDialer {
    write_timeout: Option<Duration>,
}

impl UdpDialer {
    /// Creates a dialer applying the given timeout to every write.
    pub fn new(write_timeout: Option<Duration>) -> Self {
        Self { write_timeout }
    }
}

impl Dialer for UdpDialer {
    fn dial(&self, addr: &str) -> io::Result<Arc<dyn Upstream>> {
        Ok(Arc::new(UdpUpstream::connect(addr, self.write_timeout)?))
    }
}
