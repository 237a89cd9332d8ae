//! Configuration for a billsync terminal.
//!
//! This module provides the [`Config`] struct for configuring a terminal.
//! Configuration covers the storage path, the same-device broadcast channel,
//! the sync indicator window, heartbeats, and network settings.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use billsync::Config;
//!
//! // Simple configuration with just a storage path
//! let config = Config::new("/path/to/storage");
//!
//! // Full configuration with builder pattern
//! let config = Config::new("/path/to/storage")
//!     .with_channel_name("shop-front")
//!     .with_sync_indicator(Duration::from_millis(500))
//!     .with_heartbeat_interval(Some(Duration::from_secs(30)))
//!     .with_local_only(true);
//!
//! // Default configuration (uses platform-specific data directory)
//! let config = Config::default();
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::{DEFAULT_CHANNEL_NAME, DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_SYNC_INDICATOR_MS};

/// Configuration for a billsync terminal.
///
/// # Storage Layout
///
/// The terminal keeps one JSON file per store key:
///
/// ```text
/// {storage_path}/
/// ├── users.json
/// ├── products.json
/// ├── invoices.json
/// ├── settings.json
/// ├── current_user.json
/// ├── last_hub_id.json
/// └── pos_cart.json
/// ```
///
/// # Defaults
///
/// - `storage_path`: Platform-specific data directory + "billsync"
/// - `channel_name`: [`DEFAULT_CHANNEL_NAME`]
/// - `sync_indicator`: 1 second
/// - `heartbeat_interval`: 15 seconds
/// - `hub_relay`: `true`
/// - `local_only`: `false` (relays enabled)
/// - `discovery`: `true`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the local store.
    ///
    /// This directory will be created if it doesn't exist.
    pub storage_path: PathBuf,

    /// Name of the same-device broadcast channel.
    ///
    /// Sessions only hear each other when they share a channel name.
    pub channel_name: String,

    /// How long the `is_syncing` flag stays raised after an inbound message.
    pub sync_indicator: Duration,

    /// Interval between heartbeats to open peers. `None` disables them.
    pub heartbeat_interval: Option<Duration>,

    /// Whether a hub forwards state updates from one device to its other devices.
    pub hub_relay: bool,

    /// Disable relay servers and n0 discovery.
    ///
    /// Peers must then be reachable on the local network.
    pub local_only: bool,

    /// Enable peer discovery (n0 DNS unless `local_only`, plus mDNS).
    ///
    /// With discovery off, peer addresses must be added to the endpoint by hand.
    pub discovery: bool,
}

impl Config {
    /// Create a new configuration with the given storage path
    #[must_use]
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            sync_indicator: Duration::from_millis(DEFAULT_SYNC_INDICATOR_MS),
            heartbeat_interval: Some(Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS)),
            hub_relay: true,
            local_only: false,
            discovery: true,
        }
    }

    /// Set the broadcast channel name
    #[must_use]
    pub fn with_channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = name.into();
        self
    }

    /// Set the sync indicator window
    #[must_use]
    pub const fn with_sync_indicator(mut self, window: Duration) -> Self {
        self.sync_indicator = window;
        self
    }

    /// Set the heartbeat interval
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Enable or disable hub relaying
    #[must_use]
    pub const fn with_hub_relay(mut self, enabled: bool) -> Self {
        self.hub_relay = enabled;
        self
    }

    /// Restrict networking to the local network
    #[must_use]
    pub const fn with_local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    /// Enable or disable peer discovery
    #[must_use]
    pub const fn with_discovery(mut self, enabled: bool) -> Self {
        self.discovery = enabled;
        self
    }

    /// Reject settings a terminal cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.channel_name.trim().is_empty() {
            return Err(Error::config("channel name must not be empty"));
        }
        if self.heartbeat_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::config("heartbeat interval must be non-zero; use None to disable"));
        }
        Ok(())
    }

    /// Get the default storage path
    #[must_use]
    pub fn default_storage_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("billsync")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::default_storage_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.channel_name, DEFAULT_CHANNEL_NAME);
        assert_eq!(config.sync_indicator, Duration::from_millis(DEFAULT_SYNC_INDICATOR_MS));
        assert!(config.hub_relay);
        assert!(!config.local_only);
        assert!(config.discovery);
        assert!(config.storage_path.ends_with("billsync"));
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/test")
            .with_channel_name("back-office")
            .with_sync_indicator(Duration::from_millis(250))
            .with_heartbeat_interval(None)
            .with_hub_relay(false)
            .with_local_only(true)
            .with_discovery(false);

        assert_eq!(config.storage_path, PathBuf::from("/tmp/test"));
        assert_eq!(config.channel_name, "back-office");
        assert_eq!(config.sync_indicator, Duration::from_millis(250));
        assert!(config.heartbeat_interval.is_none());
        assert!(!config.hub_relay);
        assert!(config.local_only);
        assert!(!config.discovery);
    }

    #[test]
    fn test_config_validate() {
        assert!(Config::new("/tmp/test").validate().is_ok());
        assert!(Config::new("/tmp/test")
            .with_heartbeat_interval(None)
            .validate()
            .is_ok());

        let blank = Config::new("/tmp/test").with_channel_name("  ");
        assert!(matches!(blank.validate(), Err(Error::Config(_))));

        let zero = Config::new("/tmp/test").with_heartbeat_interval(Some(Duration::ZERO));
        assert!(matches!(zero.validate(), Err(Error::Config(_))));
    }
}
