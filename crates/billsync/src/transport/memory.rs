//! In-process transport.
//!
//! [`MemoryNetwork`] plays the signaling server: terminals register by id and
//! connections are pairs of event channels. Delivery is immediate and
//! ordered per connection, which makes multi-terminal scenarios
//! deterministic in tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{PeerLink, TransportEvent};
use crate::error::{Error, Result};

#[derive(Debug)]
struct Registration {
    events: mpsc::UnboundedSender<TransportEvent>,
    links: HashSet<String>,
}

/// An in-process signaling registry shared by every terminal on it.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<Mutex<HashMap<String, Registration>>>,
}

impl MemoryNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` and deliver its events to `events`.
    ///
    /// Fails with [`Error::Identity`] if another terminal holds the id.
    pub fn open(
        &self,
        id: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<MemoryTransport> {
        let mut peers = self.peers.lock();
        if peers.contains_key(id) {
            return Err(Error::identity(format!("id {id} is already claimed")));
        }
        peers.insert(
            id.to_string(),
            Registration {
                events,
                links: HashSet::new(),
            },
        );
        info!(id = %id, "Registered on memory network");
        Ok(MemoryTransport {
            id: id.to_string(),
            network: self.clone(),
        })
    }

    /// Whether a terminal currently holds `id`
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.peers.lock().contains_key(id)
    }
}

/// A terminal's handle on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    id: String,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Our public id
    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.id
    }

    /// Connect to `remote_id`.
    ///
    /// The remote sees `Connecting` then `Opened`; we see `Opened`. An
    /// unknown id produces a single `Closed`.
    pub fn connect(&self, remote_id: &str) {
        let mut peers = self.network.peers.lock();

        let Some(own_events) = peers.get(&self.id).map(|r| r.events.clone()) else {
            debug!(id = %self.id, "Connect on a closed transport ignored");
            return;
        };

        let remote_events = match peers.get_mut(remote_id) {
            Some(remote) if remote_id != self.id => {
                remote.links.insert(self.id.clone());
                remote.events.clone()
            }
            _ => {
                debug!(peer = %remote_id, "No such peer on memory network");
                let _ = own_events.send(TransportEvent::Closed {
                    peer: remote_id.to_string(),
                });
                return;
            }
        };

        if let Some(own) = peers.get_mut(&self.id) {
            own.links.insert(remote_id.to_string());
        }
        drop(peers);

        // Remote side first, so anything we send after Opened lands behind its Opened
        let _ = remote_events.send(TransportEvent::Connecting {
            peer: self.id.clone(),
        });
        let _ = remote_events.send(TransportEvent::Opened {
            peer: self.id.clone(),
            link: PeerLink::direct(&self.id, remote_id, own_events.clone()),
        });
        let _ = own_events.send(TransportEvent::Opened {
            peer: remote_id.to_string(),
            link: PeerLink::direct(remote_id, &self.id, remote_events),
        });
        debug!(peer = %remote_id, "Memory connection opened");
    }

    /// Release the id and close every connection. Peers see `Closed`.
    pub fn close(&self) {
        let mut peers = self.network.peers.lock();
        let Some(own) = peers.remove(&self.id) else {
            return;
        };
        for peer in own.links {
            if let Some(remote) = peers.get_mut(&peer) {
                remote.links.remove(&self.id);
                let _ = remote.events.send(TransportEvent::Closed {
                    peer: self.id.clone(),
                });
            }
        }
        info!(id = %self.id, "Left memory network");
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}
