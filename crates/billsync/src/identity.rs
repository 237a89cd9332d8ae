//! Terminal identity resolution
//!
//! Every terminal is addressed on the network by a public id string. A hub's
//! id is derived from the admin username so devices can dial it again after a
//! restart; a device's id is random and only lives for one session.
//!
//! The iroh key of a terminal is a hash of its public id, which makes the
//! id itself the rendezvous address: knowing `bb-hub-MMC` is enough to
//! compute the [`NodeId`] to connect to.

use iroh::{NodeId, SecretKey};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::model::{User, UserRole};
use crate::store::{Store, StoreKey};

/// Prefix of every hub id.
pub const HUB_ID_PREFIX: &str = "bb-hub-";

/// Prefix of every device id.
pub const DEVICE_ID_PREFIX: &str = "bb-dev-";

/// Length of the random part of a device id.
const DEVICE_SUFFIX_LEN: usize = 6;

/// Domain separator mixed into key derivation.
const KEY_DOMAIN: &[u8] = b"billsync/terminal-key/v1/";

/// Network role of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Admin terminal; answers sync requests with the full snapshot
    Hub,
    /// Cashier terminal; dials out to a hub
    Device,
}

/// Who this terminal is on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalIdentity {
    /// Public id other terminals dial
    pub id: String,
    /// Network role
    pub role: Role,
    /// Human-readable name
    pub display_name: String,
}

impl TerminalIdentity {
    /// Hub identity for an admin username. Stable across restarts.
    #[must_use]
    pub fn hub(username: &str) -> Self {
        Self {
            id: hub_id(username),
            role: Role::Hub,
            display_name: username.to_string(),
        }
    }

    /// Fresh device identity for this session.
    #[must_use]
    pub fn device(display_name: &str) -> Self {
        Self {
            id: device_id(),
            role: Role::Device,
            display_name: display_name.to_string(),
        }
    }

    /// Identity for an authenticated user: admins run the hub, everyone else is a device.
    #[must_use]
    pub fn resolve(user: &User) -> Self {
        let identity = match user.role {
            UserRole::Admin => Self::hub(&user.username),
            UserRole::Device => Self::device(user.terminal_name()),
        };
        debug!(id = %identity.id, role = ?identity.role, "Resolved terminal identity");
        identity
    }

    /// Whether this terminal is the hub
    #[must_use]
    pub fn is_hub(&self) -> bool {
        self.role == Role::Hub
    }

    /// The iroh key this terminal binds its endpoint with
    #[must_use]
    pub fn secret_key(&self) -> SecretKey {
        secret_key_for(&self.id)
    }
}

/// Strip whitespace from a username.
///
/// Different usernames can sanitize to the same id ("MMC Admin" and
/// "MMCAdmin"); nothing detects that collision.
#[must_use]
pub fn sanitize_username(username: &str) -> String {
    username.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Hub id for an admin username
#[must_use]
pub fn hub_id(username: &str) -> String {
    format!("{HUB_ID_PREFIX}{}", sanitize_username(username))
}

/// A new random device id
#[must_use]
pub fn device_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DEVICE_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{DEVICE_ID_PREFIX}{suffix}")
}

/// Derive the iroh secret key for a public terminal id.
#[must_use]
pub fn secret_key_for(id: &str) -> SecretKey {
    let mut hasher = Sha256::new();
    hasher.update(KEY_DOMAIN);
    hasher.update(id.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    SecretKey::from_bytes(&digest)
}

/// The iroh node id a terminal with this public id listens on.
#[must_use]
pub fn node_id_for(id: &str) -> NodeId {
    secret_key_for(id).public()
}

/// Persist the hub a device successfully connected to.
pub fn remember_hub(store: &Store, hub_id: &str) {
    match store.write(StoreKey::LastHubId, hub_id) {
        Ok(()) => info!(hub = %hub_id, "Remembered hub for reconnection"),
        Err(e) => warn!(hub = %hub_id, error = %e, "Failed to remember hub"),
    }
}

/// The hub this device connected to last, if any.
#[must_use]
pub fn last_hub(store: &Store) -> Option<String> {
    store
        .read::<String>(StoreKey::LastHubId)
        .filter(|id| !id.is_empty())
}
