//! Peer transport.
//!
//! A transport connects this terminal to others by public id. Everything it
//! observes arrives as a [`TransportEvent`] on one unbounded channel, which
//! the session driver feeds to the sync engine in order.
//!
//! Two backends exist:
//!
//! - [`iroh`] - QUIC connections over iroh, keyed by the terminal id
//! - [`memory`] - an in-process network for tests and single-machine demos

pub mod iroh;
pub mod memory;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::Result;

pub use self::iroh::IrohTransport;
pub use self::memory::{MemoryNetwork, MemoryTransport};

/// Receiver side of a transport's event channel.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Something that happened on the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A remote terminal started connecting to us
    Connecting { peer: String },
    /// A connection is ready for traffic
    Opened { peer: String, link: PeerLink },
    /// A message arrived from a peer
    Data { peer: String, bytes: Bytes },
    /// A connection closed or never opened
    Closed { peer: String },
}

#[derive(Debug, Clone)]
enum LinkSink {
    /// Frames handed to a writer task
    Frames(mpsc::UnboundedSender<Bytes>),
    /// Delivered straight into the remote terminal's event channel
    Direct {
        from: String,
        events: mpsc::UnboundedSender<TransportEvent>,
    },
}

/// Sending side of one open connection.
#[derive(Debug, Clone)]
pub struct PeerLink {
    peer: String,
    sink: LinkSink,
}

impl PeerLink {
    pub(crate) fn frames(peer: impl Into<String>, tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            peer: peer.into(),
            sink: LinkSink::Frames(tx),
        }
    }

    pub(crate) fn direct(
        peer: impl Into<String>,
        from: impl Into<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            peer: peer.into(),
            sink: LinkSink::Direct {
                from: from.into(),
                events,
            },
        }
    }

    /// Remote terminal id
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue a message for the peer. Never blocks.
    ///
    /// Returns `false` if the connection is already gone.
    pub fn send(&self, bytes: Bytes) -> bool {
        match &self.sink {
            LinkSink::Frames(tx) => tx.send(bytes).is_ok(),
            LinkSink::Direct { from, events } => events
                .send(TransportEvent::Data {
                    peer: from.clone(),
                    bytes,
                })
                .is_ok(),
        }
    }
}

/// Which network a terminal joins when a user logs in.
#[derive(Debug, Clone)]
pub enum Network {
    /// iroh QUIC endpoints
    Iroh,
    /// An in-process network
    Memory(MemoryNetwork),
}

impl Network {
    /// The iroh network
    #[must_use]
    pub const fn iroh() -> Self {
        Self::Iroh
    }

    /// Register `id` on this network and start delivering its events.
    pub async fn open(&self, id: &str, config: &Config) -> Result<(PeerTransport, TransportEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = match self {
            Self::Iroh => PeerTransport::Iroh(IrohTransport::open(id, config, tx).await?),
            Self::Memory(network) => PeerTransport::Memory(network.open(id, tx)?),
        };
        Ok((transport, rx))
    }
}

/// An open transport handle.
#[derive(Debug)]
pub enum PeerTransport {
    Iroh(IrohTransport),
    Memory(MemoryTransport),
}

impl PeerTransport {
    /// Our public id
    #[must_use]
    pub fn local_id(&self) -> &str {
        match self {
            Self::Iroh(t) => t.local_id(),
            Self::Memory(t) => t.local_id(),
        }
    }

    /// Start connecting to a remote terminal. The outcome arrives as an event.
    pub fn connect(&self, remote_id: &str) {
        match self {
            Self::Iroh(t) => t.connect(remote_id),
            Self::Memory(t) => t.connect(remote_id),
        }
    }

    /// Tear down every connection and release the id.
    pub async fn close(&self) {
        match self {
            Self::Iroh(t) => t.close().await,
            Self::Memory(t) => t.close(),
        }
    }
}
