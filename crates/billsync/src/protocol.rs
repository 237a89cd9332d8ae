//! Sync message protocol
//!
//! Every message on either channel is a JSON object:
//!
//! ```json
//! { "type": "CATALOG_UPDATE", "payload": [ ... ], "senderId": "bb-hub-MMC" }
//! ```
//!
//! Inside the crate a message is a [`SyncMessage`] whose [`Payload`] is a
//! typed variant per message type, so dispatch in the engine is exhaustive.
//!
//! | `type` | payload |
//! |---|---|
//! | `CATALOG_UPDATE` | full product list |
//! | `SETTINGS_UPDATE` | full settings |
//! | `USER_UPDATE` | full user list |
//! | `INVOICE_NEW` | one invoice |
//! | `SYNC_REQUEST` | none |
//! | `HANDSHAKE` | `{products?, settings?, invoices?}` |
//! | `HEARTBEAT` | none |

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{AppSettings, Invoice, Product, User};

/// Largest encoded message accepted from a stream (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// The `type` tag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    CatalogUpdate,
    SettingsUpdate,
    UserUpdate,
    InvoiceNew,
    SyncRequest,
    Handshake,
    Heartbeat,
}

impl MessageKind {
    /// Wire name of this kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CatalogUpdate => "CATALOG_UPDATE",
            Self::SettingsUpdate => "SETTINGS_UPDATE",
            Self::UserUpdate => "USER_UPDATE",
            Self::InvoiceNew => "INVOICE_NEW",
            Self::SyncRequest => "SYNC_REQUEST",
            Self::Handshake => "HANDSHAKE",
            Self::Heartbeat => "HEARTBEAT",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        [
            Self::CatalogUpdate,
            Self::SettingsUpdate,
            Self::UserUpdate,
            Self::InvoiceNew,
            Self::SyncRequest,
            Self::Handshake,
            Self::Heartbeat,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == name)
    }
}

/// Bootstrap snapshot sent by a hub. Absent fields leave the receiver's copy untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<Product>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<AppSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoices: Option<Vec<Invoice>>,
}

/// Typed message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Replace the catalog
    CatalogUpdate(Vec<Product>),
    /// Replace the settings
    SettingsUpdate(AppSettings),
    /// Replace the user list
    UserUpdate(Vec<User>),
    /// Insert one invoice if unseen
    InvoiceNew(Box<Invoice>),
    /// Ask a hub for its full state
    SyncRequest,
    /// Full (or partial) state from a hub
    Handshake(HandshakePayload),
    /// Liveness ping
    Heartbeat,
}

impl Payload {
    /// The `type` tag for this payload
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::CatalogUpdate(_) => MessageKind::CatalogUpdate,
            Self::SettingsUpdate(_) => MessageKind::SettingsUpdate,
            Self::UserUpdate(_) => MessageKind::UserUpdate,
            Self::InvoiceNew(_) => MessageKind::InvoiceNew,
            Self::SyncRequest => MessageKind::SyncRequest,
            Self::Handshake(_) => MessageKind::Handshake,
            Self::Heartbeat => MessageKind::Heartbeat,
        }
    }

    /// Whether applying this payload changes replicated state.
    #[must_use]
    pub const fn carries_state(&self) -> bool {
        !matches!(self, Self::SyncRequest | Self::Heartbeat)
    }
}

/// The unit of replication.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMessage {
    /// Public id of the terminal that created the message
    pub sender_id: String,
    /// Typed body
    pub payload: Payload,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    sender_id: String,
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::protocol(format!("failed to encode payload: {e}")))
}

fn from_value<T: serde::de::DeserializeOwned>(kind: MessageKind, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::protocol(format!("malformed {} payload: {e}", kind.as_str())))
}

impl SyncMessage {
    /// Create a message from this sender
    #[must_use]
    pub fn new(sender_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            sender_id: sender_id.into(),
            payload,
        }
    }

    /// The `type` tag
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Encode as the JSON wire form.
    pub fn encode(&self) -> Result<Bytes> {
        let payload = match &self.payload {
            Payload::CatalogUpdate(products) => to_value(products)?,
            Payload::SettingsUpdate(settings) => to_value(settings)?,
            Payload::UserUpdate(users) => to_value(users)?,
            Payload::InvoiceNew(invoice) => to_value(invoice)?,
            Payload::Handshake(snapshot) => to_value(snapshot)?,
            Payload::SyncRequest | Payload::Heartbeat => Value::Null,
        };
        let envelope = Envelope {
            kind: self.kind().as_str().to_string(),
            payload,
            sender_id: self.sender_id.clone(),
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| Error::protocol(format!("failed to encode message: {e}")))?;
        Ok(Bytes::from(bytes))
    }

    /// Decode the JSON wire form.
    ///
    /// Fails with [`Error::Protocol`] for malformed JSON, an unknown `type`,
    /// or a payload that does not match its type.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Error::protocol(format!(
                "message too large: {} bytes (max {MAX_MESSAGE_SIZE})",
                bytes.len()
            )));
        }

        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::protocol(format!("malformed message: {e}")))?;

        let kind = MessageKind::parse(&envelope.kind)
            .ok_or_else(|| Error::protocol(format!("unknown message type: {}", envelope.kind)))?;

        let payload = match kind {
            MessageKind::CatalogUpdate => Payload::CatalogUpdate(from_value(kind, envelope.payload)?),
            MessageKind::SettingsUpdate => Payload::SettingsUpdate(from_value(kind, envelope.payload)?),
            MessageKind::UserUpdate => Payload::UserUpdate(from_value(kind, envelope.payload)?),
            MessageKind::InvoiceNew => Payload::InvoiceNew(Box::new(from_value(kind, envelope.payload)?)),
            MessageKind::Handshake => Payload::Handshake(from_value(kind, envelope.payload)?),
            MessageKind::SyncRequest => Payload::SyncRequest,
            MessageKind::Heartbeat => Payload::Heartbeat,
        };

        Ok(Self {
            sender_id: envelope.sender_id,
            payload,
        })
    }
}
