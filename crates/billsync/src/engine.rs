//! Sync engine.
//!
//! The engine owns the replicated collections and the connection map, and
//! is driven one event at a time: transport events, frames from the local
//! bus, and calls from the UI. Handlers never overlap because the session
//! driver holds the engine behind one lock.
//!
//! # Replication model
//!
//! Every collection is a full snapshot. Catalog, settings and users follow
//! last-writer-wins by arrival order: whichever update a terminal applies
//! last is what it keeps. Invoices are an append-only log deduplicated by id.
//!
//! # Propagation
//!
//! ```text
//! local mutation  -> local bus + every open peer
//! peer message    -> apply -> local bus (+ other peers, when this is a relaying hub)
//! bus message     -> apply (never forwarded to peers)
//! ```
//!
//! # Connection lifecycle
//!
//! ```text
//! connect_hub / Connecting -> Pending --Opened--> Open --Closed--> (removed)
//!                             Pending --Closed--> (removed)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::bus::LocalPort;
use crate::config::Config;
use crate::error::Result;
use crate::identity::{remember_hub, TerminalIdentity};
use crate::model::{round_stock, AppSettings, Invoice, Product, User};
use crate::protocol::{HandshakePayload, Payload, SyncMessage};
use crate::seed;
use crate::store::{Store, StoreKey};
use crate::transport::{PeerLink, PeerTransport, TransportEvent};

/// The replicated collections.
#[derive(Debug, Clone, PartialEq)]
pub struct Collections {
    pub users: Vec<User>,
    pub products: Vec<Product>,
    /// Newest first
    pub invoices: Vec<Invoice>,
    pub settings: AppSettings,
}

impl Collections {
    /// Load from the store, seeding defaults on first run.
    #[must_use]
    pub fn load(store: &Store) -> Self {
        Self {
            users: store.read_or_seed(StoreKey::Users, seed::default_users),
            products: store.read_or_seed(StoreKey::Products, seed::default_products),
            invoices: store.read(StoreKey::Invoices).unwrap_or_default(),
            settings: store.read_or_seed(StoreKey::Settings, seed::default_settings),
        }
    }

    /// Apply a state-bearing payload and persist the collections it touched.
    ///
    /// Returns `false` for payloads without state and for an invoice that is
    /// already in the log. Store failures are logged; memory keeps the update.
    pub fn apply(&mut self, payload: &Payload, store: &Store) -> bool {
        if !payload.carries_state() {
            return false;
        }

        match payload {
            Payload::Handshake(snapshot) => {
                if let Some(products) = &snapshot.products {
                    self.products = products.clone();
                    persist(store, StoreKey::Products, &self.products);
                }
                if let Some(settings) = &snapshot.settings {
                    self.settings = settings.clone();
                    persist(store, StoreKey::Settings, &self.settings);
                }
                if let Some(invoices) = &snapshot.invoices {
                    self.invoices = invoices.clone();
                    persist(store, StoreKey::Invoices, &self.invoices);
                }
            }
            Payload::CatalogUpdate(products) => {
                self.products = products.clone();
                persist(store, StoreKey::Products, &self.products);
            }
            Payload::SettingsUpdate(settings) => {
                self.settings = settings.clone();
                persist(store, StoreKey::Settings, &self.settings);
            }
            Payload::UserUpdate(users) => {
                self.users = users.clone();
                persist(store, StoreKey::Users, &self.users);
            }
            Payload::InvoiceNew(invoice) => {
                if self.invoices.iter().any(|i| i.id == invoice.id) {
                    debug!(invoice = %invoice.id, "Invoice already known");
                    return false;
                }
                self.invoices.insert(0, invoice.as_ref().clone());
                persist(store, StoreKey::Invoices, &self.invoices);
            }
            Payload::SyncRequest | Payload::Heartbeat => return false,
        }
        true
    }
}

/// Inbound writes fail soft: memory keeps the update, the store catches up on the next write.
fn persist<T: Serialize + ?Sized>(store: &Store, key: StoreKey, value: &T) {
    if let Err(e) = store.write(key, value) {
        warn!(%key, error = %e, "Failed to persist inbound update");
    }
}

/// Where an inbound message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Another session on this device
    Local,
    /// A connected peer, by terminal id
    Peer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing or being dialed; not usable yet
    Pending,
    /// Ready for traffic
    Open,
}

#[derive(Debug)]
struct Connection {
    state: ConnectionState,
    link: Option<PeerLink>,
    /// We dialed this peer through `connect_hub`
    outbound: bool,
}

/// Read-only view of the sync state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Our id, when this terminal is the hub
    pub hub_id: Option<String>,
    /// Peers with an open connection, sorted
    pub connected_peers: Vec<String>,
    /// An inbound update was applied within the indicator window
    pub is_syncing: bool,
}

/// Connection bookkeeping plus per-message reactions for one terminal.
pub struct SyncEngine {
    identity: TerminalIdentity,
    store: Store,
    state: Collections,
    connections: HashMap<String, Connection>,
    port: LocalPort,
    transport: Arc<PeerTransport>,
    hub_relay: bool,
    sync_indicator: Duration,
    syncing_until: Option<Instant>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("identity", &self.identity)
            .field("connections", &self.connections)
            .field("syncing_until", &self.syncing_until)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        identity: TerminalIdentity,
        store: Store,
        state: Collections,
        port: LocalPort,
        transport: Arc<PeerTransport>,
        config: &Config,
    ) -> Self {
        info!(id = %identity.id, role = ?identity.role, "Sync engine started");
        Self {
            identity,
            store,
            state,
            connections: HashMap::new(),
            port,
            transport,
            hub_relay: config.hub_relay,
            sync_indicator: config.sync_indicator,
            syncing_until: None,
        }
    }

    /// Who this terminal is
    #[must_use]
    pub fn identity(&self) -> &TerminalIdentity {
        &self.identity
    }

    /// Current collections
    #[must_use]
    pub fn collections(&self) -> &Collections {
        &self.state
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let mut connected_peers: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, c)| c.state == ConnectionState::Open)
            .map(|(id, _)| id.clone())
            .collect();
        connected_peers.sort();

        SyncStatus {
            hub_id: self.identity.is_hub().then(|| self.identity.id.clone()),
            connected_peers,
            is_syncing: self.syncing_until.is_some_and(|until| Instant::now() < until),
        }
    }

    /// State of the connection to `peer`, if any
    #[must_use]
    pub fn connection_state(&self, peer: &str) -> Option<ConnectionState> {
        self.connections.get(peer).map(|c| c.state)
    }

    /// Start connecting to a hub. The result shows up in [`status`](Self::status).
    pub fn connect_hub(&mut self, hub_id: &str) {
        let hub_id = hub_id.trim();
        if hub_id.is_empty() || hub_id == self.identity.id {
            debug!(hub = %hub_id, "Ignoring connect to empty or own id");
            return;
        }
        // One attempt at a time: a second dial's outcome could clobber the first
        match self.connection_state(hub_id) {
            Some(ConnectionState::Open) => {
                debug!(hub = %hub_id, "Already connected");
                return;
            }
            Some(ConnectionState::Pending) => {
                debug!(hub = %hub_id, "Connection attempt already in progress");
                return;
            }
            None => {}
        }

        info!(hub = %hub_id, "Connecting to hub");
        self.connections.insert(
            hub_id.to_string(),
            Connection {
                state: ConnectionState::Pending,
                link: None,
                outbound: true,
            },
        );
        self.transport.connect(hub_id);
    }

    /// React to one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting { peer } => {
                debug!(peer = %peer, "Incoming connection");
                self.connections.entry(peer).or_insert(Connection {
                    state: ConnectionState::Pending,
                    link: None,
                    outbound: false,
                });
            }
            TransportEvent::Opened { peer, link } => self.on_open(peer, link),
            TransportEvent::Data { peer, bytes } => self.on_peer_data(&peer, &bytes),
            TransportEvent::Closed { peer } => {
                if self.connections.remove(&peer).is_some() {
                    info!(peer = %peer, "Peer disconnected");
                }
            }
        }
    }

    fn on_open(&mut self, peer: String, link: PeerLink) {
        let connection = self.connections.entry(peer.clone()).or_insert(Connection {
            state: ConnectionState::Pending,
            link: None,
            outbound: false,
        });
        connection.state = ConnectionState::Open;
        connection.link = Some(link.clone());
        let outbound = connection.outbound;

        info!(peer = %peer, outbound, "Peer connection open");

        if self.identity.is_hub() {
            return;
        }
        if outbound {
            remember_hub(&self.store, &peer);
        }
        if let Some(bytes) = self.encode(Payload::SyncRequest) {
            debug!(peer = %peer, "Requesting full state");
            link.send(bytes);
        }
    }

    fn on_peer_data(&mut self, peer: &str, bytes: &Bytes) {
        let message = match SyncMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Dropping malformed message");
                return;
            }
        };

        if !self.apply(&message, &Origin::Peer(peer.to_string())) {
            return;
        }

        // Other sessions on this device follow the network
        self.port.post(bytes.clone());

        if self.identity.is_hub() && self.hub_relay {
            for (id, connection) in &self.connections {
                if id == peer || *id == message.sender_id {
                    continue;
                }
                if let (ConnectionState::Open, Some(link)) = (connection.state, &connection.link) {
                    trace!(from = %peer, to = %id, kind = ?message.kind(), "Relaying");
                    link.send(bytes.clone());
                }
            }
        }
    }

    /// React to a frame from another session on this device.
    pub fn handle_local_frame(&mut self, bytes: &[u8]) {
        match SyncMessage::decode(bytes) {
            Ok(message) => {
                self.apply(&message, &Origin::Local);
            }
            Err(e) => warn!(error = %e, "Dropping malformed local message"),
        }
    }

    /// Apply an inbound message.
    ///
    /// Returns `true` when replicated state changed, which is when the
    /// message should travel further.
    pub fn apply(&mut self, message: &SyncMessage, origin: &Origin) -> bool {
        if message.sender_id == self.identity.id {
            trace!(kind = ?message.kind(), "Dropping self-originated message");
            return false;
        }

        debug!(kind = ?message.kind(), sender = %message.sender_id, ?origin, "Applying message");

        // Requests and heartbeats change nothing, so they never raise `is_syncing`
        if let (Payload::SyncRequest, true, Origin::Peer(peer)) =
            (&message.payload, self.identity.is_hub(), origin)
        {
            self.send_handshake(peer);
        }

        if !self.state.apply(&message.payload, &self.store) {
            return false;
        }
        self.syncing_until = Some(Instant::now() + self.sync_indicator);
        true
    }

    fn send_handshake(&self, peer: &str) {
        let Some(link) = self
            .connections
            .get(peer)
            .filter(|c| c.state == ConnectionState::Open)
            .and_then(|c| c.link.as_ref())
        else {
            debug!(peer = %peer, "Sync request from a peer without an open link");
            return;
        };

        let snapshot = HandshakePayload {
            products: Some(self.state.products.clone()),
            settings: Some(self.state.settings.clone()),
            invoices: Some(self.state.invoices.clone()),
        };
        if let Some(bytes) = self.encode(Payload::Handshake(snapshot)) {
            info!(peer = %peer, "Sending handshake");
            link.send(bytes);
        }
    }

    fn encode(&self, payload: Payload) -> Option<Bytes> {
        let message = SyncMessage::new(self.identity.id.clone(), payload);
        match message.encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(kind = ?message.kind(), error = %e, "Failed to encode message");
                None
            }
        }
    }

    /// Post to the local bus and send to every open peer.
    fn broadcast(&self, payload: Payload) {
        let kind = payload.kind();
        let Some(bytes) = self.encode(payload) else {
            return;
        };

        self.port.post(bytes.clone());

        let mut sent = 0usize;
        for connection in self.connections.values() {
            if let (ConnectionState::Open, Some(link)) = (connection.state, &connection.link) {
                if link.send(bytes.clone()) {
                    sent += 1;
                } else {
                    debug!(peer = %link.peer(), "Link already gone");
                }
            }
        }
        debug!(?kind, peers = sent, "Broadcast");
    }

    /// Record a completed sale: decrement stock, then log the invoice.
    ///
    /// Emits `CATALOG_UPDATE` followed by `INVOICE_NEW`. Memory and
    /// broadcasts happen even when persisting fails; the error is returned.
    /// Saving an invoice that is already logged only retries the writes, so
    /// stock is never decremented twice for one sale.
    pub fn save_invoice(&mut self, invoice: Invoice) -> Result<()> {
        if self.state.invoices.iter().any(|i| i.id == invoice.id) {
            debug!(invoice = %invoice.id, "Invoice already recorded, rewriting store only");
            let products_saved = self.store.write(StoreKey::Products, &self.state.products);
            let invoices_saved = self.store.write(StoreKey::Invoices, &self.state.invoices);
            return products_saved.and(invoices_saved);
        }

        for product in &mut self.state.products {
            let sold: f64 = invoice
                .items
                .iter()
                .filter(|item| item.product_id == product.id)
                .map(|item| item.quantity)
                .sum();
            if sold != 0.0 {
                product.stock_quantity = round_stock(product.stock_quantity - sold);
            }
        }
        let products_saved = self.store.write(StoreKey::Products, &self.state.products);
        self.broadcast(Payload::CatalogUpdate(self.state.products.clone()));

        self.state.invoices.insert(0, invoice.clone());
        let invoices_saved = self.store.write(StoreKey::Invoices, &self.state.invoices);
        info!(invoice = %invoice.id, number = %invoice.invoice_number, total = invoice.total_amount, "Invoice saved");
        self.broadcast(Payload::InvoiceNew(Box::new(invoice)));

        products_saved.and(invoices_saved)
    }

    /// Replace the catalog and broadcast it.
    pub fn update_products(&mut self, products: Vec<Product>) -> Result<()> {
        self.state.products = products;
        let saved = self.store.write(StoreKey::Products, &self.state.products);
        self.broadcast(Payload::CatalogUpdate(self.state.products.clone()));
        saved
    }

    /// Replace the settings and broadcast them.
    pub fn update_settings(&mut self, settings: AppSettings) -> Result<()> {
        self.state.settings = settings;
        let saved = self.store.write(StoreKey::Settings, &self.state.settings);
        self.broadcast(Payload::SettingsUpdate(self.state.settings.clone()));
        saved
    }

    /// Replace the user list and broadcast it.
    pub fn update_users(&mut self, users: Vec<User>) -> Result<()> {
        self.state.users = users;
        let saved = self.store.write(StoreKey::Users, &self.state.users);
        self.broadcast(Payload::UserUpdate(self.state.users.clone()));
        saved
    }

    /// Replace the invoice log on this terminal only.
    pub fn replace_invoices(&mut self, invoices: Vec<Invoice>) -> Result<()> {
        self.state.invoices = invoices;
        self.store.write(StoreKey::Invoices, &self.state.invoices)
    }

    /// Ping every open peer.
    pub fn send_heartbeat(&self) {
        let Some(bytes) = self.encode(Payload::Heartbeat) else {
            return;
        };
        for connection in self.connections.values() {
            if let (ConnectionState::Open, Some(link)) = (connection.state, &connection.link) {
                link.send(bytes.clone());
            }
        }
        trace!("Heartbeat sent");
    }

    /// Drop every connection. The caller closes the transport.
    pub fn shutdown(&mut self) -> Collections {
        let dropped = self.connections.len();
        self.connections.clear();
        self.syncing_until = None;
        info!(id = %self.identity.id, dropped, "Sync engine stopped");
        self.state.clone()
    }
}
