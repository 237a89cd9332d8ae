//! Error types for billsync.
//!
//! This module defines the [`enum@Error`] enum and [`Result`] type alias used throughout
//! the library.
//!
//! # Error Categories
//!
//! Errors are categorized by the operation that failed:
//!
//! - [`Error::Init`] - Terminal boot failures
//! - [`Error::Identity`] - Identity registration (e.g. an id already claimed on the network)
//! - [`Error::Connection`] - Peer transport failures
//! - [`Error::Protocol`] - Malformed or unknown sync messages
//! - [`Error::Storage`] - Local store read/write failures
//! - [`Error::Auth`] - Login failures
//! - [`Error::Validation`] - Rejected local edits (empty cart, last company, ...)
//! - [`Error::Config`] - Configuration issues
//! - [`Error::NotLoggedIn`] - Session operation without an authenticated user
//! - [`Error::Shutdown`] - Operation on a closed session
//!
//! Inbound sync traffic never surfaces these to the caller: the engine logs
//! and drops protocol errors, and falls back to defaults on storage errors.
//!
//! # Example
//!
//! ```rust,no_run
//! use billsync::{Config, Error, Network, Terminal};
//!
//! # async fn example() -> billsync::Result<()> {
//! let terminal = Terminal::boot(Config::default(), Network::iroh()).await?;
//!
//! match terminal.login("MMC", "wrong").await {
//!     Ok(user) => println!("Logged in as {}", user.username),
//!     Err(Error::Auth(msg)) => eprintln!("Login refused: {msg}"),
//!     Err(e) => eprintln!("Other error: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use thiserror::Error;

/// Result type alias for billsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in billsync operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Failed to boot the terminal
    #[error("initialization failed: {0}")]
    Init(Arc<str>),

    /// Failed to register or derive a terminal identity
    #[error("identity error: {0}")]
    Identity(Arc<str>),

    /// Peer connection failed
    #[error("connection failed: {0}")]
    Connection(Arc<str>),

    /// A sync message could not be decoded
    #[error("protocol error: {0}")]
    Protocol(Arc<str>),

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(Arc<str>),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Auth(Arc<str>),

    /// A local edit was rejected
    #[error("invalid operation: {0}")]
    Validation(Arc<str>),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(Arc<str>),

    /// No user is logged in on this terminal
    #[error("no user is logged in")]
    NotLoggedIn,

    /// The session has been shut down
    #[error("session has been shut down")]
    Shutdown,
}

impl Error {
    /// Create an initialization error
    #[inline]
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(Arc::from(msg.into()))
    }

    /// Create an identity error
    #[inline]
    pub fn identity(msg: impl Into<String>) -> Self {
        Self::Identity(Arc::from(msg.into()))
    }

    /// Create a connection error
    #[inline]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(Arc::from(msg.into()))
    }

    /// Create a protocol error
    #[inline]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(Arc::from(msg.into()))
    }

    /// Create a storage error
    #[inline]
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(Arc::from(msg.into()))
    }

    /// Create an authentication error
    #[inline]
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(Arc::from(msg.into()))
    }

    /// Create a validation error
    #[inline]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(Arc::from(msg.into()))
    }

    /// Create a configuration error
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(Arc::from(msg.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::storage("disk full").to_string(),
            "storage error: disk full"
        );
        assert_eq!(Error::NotLoggedIn.to_string(), "no user is logged in");
    }

    #[test]
    fn test_error_is_cheap_to_clone() {
        let err = Error::protocol("unknown message type: PING");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
