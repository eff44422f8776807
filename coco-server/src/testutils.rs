use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::upstream::{Dialer, Upstream};

/// An upstream recording all datagrams, which can be switched to fail or to panic.
#[derive(Debug)]
pub struct MockUpstream {
    peer: SocketAddr,
    failing: AtomicBool,
    panicking: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockUpstream {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            failing: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::Relaxed);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

impl Upstream for MockUpstream {
    fn peer(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn send(&self, payload: &[u8]) -> io::Result<()> {
        if self.panicking.load(Ordering::Relaxed) {
            panic!("mock upstream {} panicked", self.peer);
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "mock failure"));
        }
        self.sent.lock().push(payload.to_vec());
        Ok(())
    }
}

/// A dialer handing out [`MockUpstream`]s, with a set of unreachable addresses.
#[derive(Debug, Default)]
pub struct MockDialer {
    unreachable: BTreeSet<String>,
    dialed: Mutex<Vec<(String, Arc<MockUpstream>)>>,
}

impl MockDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(mut self, addr: &str) -> Self {
        self.unreachable.insert(addr.to_owned());
        self
    }

    /// Returns the upstream dialed for `addr`.
    pub fn upstream(&self, addr: &str) -> Arc<MockUpstream> {
        self.dialed
            .lock()
            .iter()
            .find(|(a, _)| a == addr)
            .map(|(_, upstream)| Arc::clone(upstream))
            .unwrap_or_else(|| panic!("{addr} was not dialed"))
    }

    /// Returns how often `addr` was dialed.
    pub fn dial_count(&self, addr: &str) -> usize {
        self.dialed.lock().iter().filter(|(a, _)| a == addr).count()
    }
}

impl Dialer for MockDialer {
    fn dial(&self, addr: &str) -> io::Result<Arc<dyn Upstream>> {
        if self.unreachable.contains(addr) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "unreachable"));
        }

        let peer = addr
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;

        let upstream = Arc::new(MockUpstream::new(peer));
        self.dialed
            .lock()
            .push((addr.to_owned(), Arc::clone(&upstream)));
        Ok(upstream)
    }
}
