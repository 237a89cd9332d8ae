//! Same-device broadcast channel.
//!
//! Several sessions in one process (one per open window) share a bus by
//! name. A frame posted on a port reaches every other port on the same bus,
//! never the port that posted it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

/// Frames buffered per subscriber before it starts lagging.
const BUS_CAPACITY: usize = 256;

static BUSES: OnceLock<Mutex<HashMap<String, broadcast::Sender<Frame>>>> = OnceLock::new();
static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct Frame {
    origin: u64,
    bytes: Bytes,
}

/// A named broadcast channel shared by every session in the process.
#[derive(Debug, Clone)]
pub struct LocalBus {
    name: String,
    tx: broadcast::Sender<Frame>,
}

impl LocalBus {
    /// Join the bus with this name, creating it if no session has yet.
    #[must_use]
    pub fn named(name: &str) -> Self {
        let mut buses = BUSES.get_or_init(|| Mutex::new(HashMap::new())).lock();
        let tx = buses
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(BUS_CAPACITY).0)
            .clone();
        Self {
            name: name.to_string(),
            tx,
        }
    }

    /// Bus name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a port: a sender and the matching subscription that skips its own frames.
    #[must_use]
    pub fn port(&self) -> (LocalPort, LocalSubscription) {
        let id = NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(bus = %self.name, port = id, "Opened local bus port");
        (
            LocalPort {
                id,
                tx: self.tx.clone(),
            },
            LocalSubscription {
                id,
                rx: self.tx.subscribe(),
            },
        )
    }
}

/// Sending half of a bus port.
#[derive(Debug, Clone)]
pub struct LocalPort {
    id: u64,
    tx: broadcast::Sender<Frame>,
}

impl LocalPort {
    /// Post a frame to every other port. Never blocks; with no listeners the frame is dropped.
    pub fn post(&self, bytes: Bytes) {
        let _ = self.tx.send(Frame {
            origin: self.id,
            bytes,
        });
    }
}

/// Receiving half of a bus port.
#[derive(Debug)]
pub struct LocalSubscription {
    id: u64,
    rx: broadcast::Receiver<Frame>,
}

impl LocalSubscription {
    /// Wait for the next frame posted by another port.
    ///
    /// Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(frame) if frame.origin == self.id => continue,
                Ok(frame) => return Some(frame.bytes),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(port = self.id, skipped, "Local bus subscriber lagged, frames dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next pending frame without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) if frame.origin == self.id => continue,
                Ok(frame) => return Some(frame.bytes),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(port = self.id, skipped, "Local bus subscriber lagged, frames dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_post_reaches_other_ports_only() {
        let bus = LocalBus::named("bus-test-fanout");
        let (a, mut a_sub) = bus.port();
        let (_b, mut b_sub) = bus.port();
        let (_c, mut c_sub) = LocalBus::named("bus-test-fanout").port();

        a.post(Bytes::from_static(b"hello"));

        assert_eq!(b_sub.recv().await.as_deref(), Some(&b"hello"[..]));
        assert_eq!(c_sub.recv().await.as_deref(), Some(&b"hello"[..]));
        assert!(a_sub.try_recv().is_none());
    }

    #[test]
    fn test_buses_are_isolated_by_name() {
        let (front, _front_sub) = LocalBus::named("bus-test-front").port();
        let (_back, mut back_sub) = LocalBus::named("bus-test-back").port();

        front.post(Bytes::from_static(b"x"));
        assert!(back_sub.try_recv().is_none());
    }

    #[test]
    fn test_post_without_listeners_is_dropped() {
        let bus = LocalBus::named("bus-test-empty");
        let (port, sub) = bus.port();
        drop(sub);
        port.post(Bytes::from_static(b"nobody"));
        assert_eq!(bus.name(), "bus-test-empty");
    }

    #[test]
    fn test_lagging_subscriber_recovers() {
        let bus = LocalBus::named("bus-test-lag");
        let (port, _own) = bus.port();
        let (_other, mut slow) = bus.port();

        for i in 0..(BUS_CAPACITY + 10) {
            port.post(Bytes::from(i.to_string()));
        }

        // Oldest frames are gone, but the newest are still delivered
        let first = slow.try_recv().unwrap();
        assert_ne!(first, Bytes::from_static(b"0"));
        let mut last = first;
        while let Some(next) = slow.try_recv() {
            last = next;
        }
        assert_eq!(last, Bytes::from((BUS_CAPACITY + 9).to_string()));
    }
}
