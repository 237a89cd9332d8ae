//! # billsync - Peer-to-peer sync for point-of-sale terminals
//!
//! billsync keeps a shop's terminals in step without a server. One admin
//! terminal acts as the hub; cashier terminals dial it directly and receive
//! the catalog, company settings, users and the invoice log. Every terminal
//! keeps working from its local store when the network is gone.
//!
//! ## Features
//!
//! - **Local first**: Reads and writes go to memory and a local JSON store.
//! - **Direct connections**: Terminals connect over iroh, addressed by a
//!   public id derived from the admin username.
//! - **Same-device fan-out**: Sessions in one process share a broadcast bus,
//!   so every open window sees the same state.
//! - **Simple merging**: Collections are full snapshots, last writer wins;
//!   invoices are an append-only log deduplicated by id.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use billsync::{Config, Network, SaleDetails, Terminal};
//!
//! #[tokio::main]
//! async fn main() -> billsync::Result<()> {
//!     let terminal = Terminal::boot(Config::new("/path/to/storage"), Network::iroh()).await?;
//!
//!     // Cashier login; the terminal reconnects to the last hub on its own
//!     terminal.login("counter1", "secret").await?;
//!     terminal.connect_hub("bb-hub-MMC")?;
//!
//!     // Ring up a sale
//!     terminal.add_to_cart("p1")?;
//!     let invoice = terminal.complete_sale(SaleDetails::default())?;
//!     println!("Billed {} for {}", invoice.invoice_number, invoice.total_amount);
//!
//!     println!("Connected peers: {:?}", terminal.status().connected_peers);
//!     terminal.logout().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: Terminal configuration
//! - [`error`]: Error types and Result alias
//! - [`model`]: Replicated records
//! - [`node`]: The [`Terminal`] session and its public API
//! - [`engine`]: Sync engine state machine
//! - [`protocol`]: Sync messages and their wire form
//! - [`store`]: Local key-value persistence
//! - [`cart`]: Point-of-sale cart
//!
//! ## Internal Modules
//!
//! - [`identity`]: Terminal ids and key derivation
//! - [`bus`]: Same-device broadcast channel
//! - [`transport`]: Peer transports (iroh and in-process)
//! - [`seed`]: First-run defaults

#![forbid(unsafe_code)]
#![warn(clippy::all)]

// =============================================================================
// Public modules - stable API
// =============================================================================

pub mod cart;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod node;
pub mod protocol;
pub mod store;

// =============================================================================
// Internal modules
// =============================================================================

pub mod bus;
pub mod identity;
pub mod seed;
pub mod transport;

// =============================================================================
// Public re-exports - the primary public API
// =============================================================================

pub use cart::{Cart, CartLine, SaleDetails};
pub use config::Config;
pub use engine::{Collections, ConnectionState, Origin, SyncEngine, SyncStatus};
pub use error::{Error, Result};
pub use identity::{Role, TerminalIdentity};
pub use model::{
    AppSettings, Backup, Branding, Company, Invoice, InvoiceItem, PaymentMethod, PrinterConfig,
    Product, User, UserRole,
};
pub use node::Terminal;
pub use protocol::{HandshakePayload, MessageKind, Payload, SyncMessage};
pub use store::{Store, StoreKey};
pub use transport::{MemoryNetwork, Network};

// =============================================================================
// Constants
// =============================================================================

/// The ALPN identifier for billsync connections.
pub const ALPN: &[u8] = b"billsync/1";

/// Default name of the same-device broadcast channel.
pub const DEFAULT_CHANNEL_NAME: &str = "billsync-terminal-sync";

/// How long `is_syncing` stays raised after an inbound update, in milliseconds.
pub const DEFAULT_SYNC_INDICATOR_MS: u64 = 1000;

/// Default interval between heartbeats to open peers.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;
