//! Wire-format marshalers.
//!
//! The connection negotiates JSON or MessagePack through the WebSocket
//! sub-protocol; both formats honor the same serde field names, so any
//! message type can be carried by either. Marshalers are stateless and
//! safe to use concurrently.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::messages::{SUBPROTOCOL_JSON, SUBPROTOCOL_MSGPACK};

/// Errors from encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("couldn't marshal value as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("couldn't marshal value as MessagePack: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("couldn't unmarshal value from MessagePack: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),
}

/// A wire-format encoder/decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marshaler {
    Json,
    MessagePack,
}

impl Marshaler {
    /// Select the marshaler negotiated by a WebSocket sub-protocol, or
    /// `None` for unsupported sub-protocols.
    #[must_use]
    pub fn for_subprotocol(subprotocol: &str) -> Option<Self> {
        match subprotocol {
            SUBPROTOCOL_JSON => Some(Self::Json),
            SUBPROTOCOL_MSGPACK => Some(Self::MessagePack),
            _ => None,
        }
    }

    /// Whether this marshaler's frames are binary (MessagePack) rather
    /// than text (JSON).
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::MessagePack)
    }

    /// Encode a value.
    ///
    /// MessagePack encoding writes maps keyed by field name, matching
    /// the JSON field names, so handlers can produce either
    /// representation from one type.
    pub fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, MarshalError> {
        match self {
            Self::Json => Ok(serde_json::to_vec(value)?),
            Self::MessagePack => Ok(rmp_serde::to_vec_named(value)?),
        }
    }

    /// Decode a value.
    pub fn unmarshal<T: DeserializeOwned>(&self, marshaled: &[u8]) -> Result<T, MarshalError> {
        match self {
            Self::Json => Ok(serde_json::from_slice(marshaled)?),
            Self::MessagePack => Ok(rmp_serde::from_slice(marshaled)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ClientMessage, Disconnect, Payload, ServerMessage};

    const BOTH: [Marshaler; 2] = [Marshaler::Json, Marshaler::MessagePack];

    #[test]
    fn subprotocol_selection() {
        assert_eq!(
            Marshaler::for_subprotocol("actioncable-v1-json"),
            Some(Marshaler::Json)
        );
        assert_eq!(
            Marshaler::for_subprotocol("actioncable-v1-msgpack"),
            Some(Marshaler::MessagePack)
        );
        assert_eq!(Marshaler::for_subprotocol("actioncable-v1-ext-json"), None);
        assert!(!Marshaler::Json.is_binary());
        assert!(Marshaler::MessagePack.is_binary());
    }

    #[test]
    fn client_messages_round_trip() {
        let messages = [
            ClientMessage::subscribe("{\"channel\":\"Chat\"}"),
            ClientMessage::unsubscribe("{\"channel\":\"Chat\"}"),
            ClientMessage::action("{\"channel\":\"Chat\"}", "{\"action\":\"speak\"}"),
        ];
        for marshaler in BOTH {
            for message in &messages {
                let encoded = marshaler.marshal(message).unwrap();
                let decoded: ClientMessage = marshaler.unmarshal(&encoded).unwrap();
                assert_eq!(&decoded, message, "{marshaler:?}");
            }
        }
    }

    #[test]
    fn server_messages_round_trip() {
        let messages = [
            ServerMessage::welcome(),
            ServerMessage::ping(1700000000),
            ServerMessage::confirmation("{\"channel\":\"Chat\"}"),
            ServerMessage::rejection("{\"channel\":\"Chat\"}"),
            ServerMessage::data_text("{\"channel\":\"Chat\"}", "<p>hello</p>"),
            ServerMessage::data_bytes("{\"channel\":\"Chat\"}", vec![0, 159, 146, 150]),
        ];
        for marshaler in BOTH {
            for message in &messages {
                let encoded = marshaler.marshal(message).unwrap();
                let decoded: ServerMessage = marshaler.unmarshal(&encoded).unwrap();
                assert_eq!(&decoded, message, "{marshaler:?}");
            }
        }
    }

    #[test]
    fn disconnects_round_trip() {
        for marshaler in BOTH {
            for message in [
                Disconnect::new("logged out", false),
                Disconnect::new("restarting", true),
            ] {
                let encoded = marshaler.marshal(&message).unwrap();
                let decoded: Disconnect = marshaler.unmarshal(&encoded).unwrap();
                assert_eq!(decoded, message, "{marshaler:?}");
            }
        }
    }

    #[test]
    fn binary_payloads_survive_both_formats() {
        // Bytes that are not valid UTF-8 must come back as binary, not
        // be silently coerced into text.
        let message = ServerMessage::data_bytes("id", vec![0xff, 0xfe, 0x00]);
        for marshaler in BOTH {
            let encoded = marshaler.marshal(&message).unwrap();
            let decoded: ServerMessage = marshaler.unmarshal(&encoded).unwrap();
            match decoded.message {
                Some(Payload::Binary(bytes)) => assert_eq!(bytes.as_ref(), &[0xff, 0xfe, 0x00]),
                other => panic!("expected binary payload, got {other:?}"),
            }
        }
    }
}
