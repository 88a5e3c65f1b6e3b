//! Action Cable message types.
//!
//! These are the objects carried in WebSocket frames between the
//! browser and the server. Field names follow the Action Cable wire
//! protocol; optional fields are omitted when absent so the encoded
//! form matches what Action Cable clients expect.

use serde::{Deserialize, Serialize};

/// Sub-protocol name for JSON encoding over text frames.
pub const SUBPROTOCOL_JSON: &str = "actioncable-v1-json";
/// Sub-protocol name for MessagePack encoding over binary frames.
pub const SUBPROTOCOL_MSGPACK: &str = "actioncable-v1-msgpack";

/// Client-to-server commands.
///
/// Anything else in the `command` field fails decoding, which
/// terminates the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "subscribe")]
    Subscribe,
    #[serde(rename = "unsubscribe")]
    Unsubscribe,
    #[serde(rename = "message")]
    Action,
}

/// A client-to-server message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub command: Command,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
}

impl ClientMessage {
    /// Create a subscribe command for the identifier.
    #[must_use]
    pub fn subscribe(identifier: impl Into<String>) -> Self {
        Self {
            command: Command::Subscribe,
            identifier: identifier.into(),
            data: String::new(),
        }
    }

    /// Create an unsubscribe command for the identifier.
    #[must_use]
    pub fn unsubscribe(identifier: impl Into<String>) -> Self {
        Self {
            command: Command::Unsubscribe,
            identifier: identifier.into(),
            data: String::new(),
        }
    }

    /// Create an action command for the identifier.
    #[must_use]
    pub fn action(identifier: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            command: Command::Action,
            identifier: identifier.into(),
            data: data.into(),
        }
    }
}

/// Control-message kinds in the `type` field of server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessageKind {
    Welcome,
    Ping,
    ConfirmSubscription,
    RejectSubscription,
}

/// A data payload forwarded to a subscription: either rendered text or
/// raw bytes, depending on what the channel produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Binary(serde_bytes::ByteBuf),
}

/// A server-to-client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ServerMessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Payload>,
}

impl ServerMessage {
    /// The welcome message sent once after the handshake.
    #[must_use]
    pub fn welcome() -> Self {
        Self {
            kind: Some(ServerMessageKind::Welcome),
            identifier: None,
            message: None,
        }
    }

    /// A keepalive ping carrying the current Unix time in seconds.
    #[must_use]
    pub fn ping(unix_seconds: u64) -> Self {
        Self {
            kind: Some(ServerMessageKind::Ping),
            identifier: None,
            message: Some(Payload::Text(unix_seconds.to_string())),
        }
    }

    /// Confirmation of a subscribe command.
    #[must_use]
    pub fn confirmation(identifier: impl Into<String>) -> Self {
        Self {
            kind: Some(ServerMessageKind::ConfirmSubscription),
            identifier: Some(identifier.into()),
            message: None,
        }
    }

    /// Rejection of a subscribe command.
    #[must_use]
    pub fn rejection(identifier: impl Into<String>) -> Self {
        Self {
            kind: Some(ServerMessageKind::RejectSubscription),
            identifier: Some(identifier.into()),
            message: None,
        }
    }

    /// A data message carrying rendered text for a subscription.
    #[must_use]
    pub fn data_text(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: None,
            identifier: Some(identifier.into()),
            message: Some(Payload::Text(message.into())),
        }
    }

    /// A data message carrying raw bytes for a subscription.
    #[must_use]
    pub fn data_bytes(identifier: impl Into<String>, message: Vec<u8>) -> Self {
        Self {
            kind: None,
            identifier: Some(identifier.into()),
            message: Some(Payload::Binary(serde_bytes::ByteBuf::from(message))),
        }
    }
}

/// The final message sent before closing a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disconnect {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reconnect: bool,
}

impl Disconnect {
    /// Create a disconnect message with a (sanitized) reason.
    #[must_use]
    pub fn new(reason: impl Into<String>, reconnect: bool) -> Self {
        Self {
            kind: "disconnect".to_string(),
            reason: reason.into(),
            reconnect,
        }
    }
}
