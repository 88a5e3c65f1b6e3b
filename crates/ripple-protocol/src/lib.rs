//! # ripple-protocol
//!
//! Wire protocol for the Ripple realtime framework: the Action Cable
//! message types exchanged over WebSocket, the JSON and MessagePack
//! marshalers selected by sub-protocol negotiation, and the HMAC
//! signer for subscription identifier names.
//!
//! ## Example
//!
//! ```rust
//! use ripple_protocol::{Marshaler, ServerMessage};
//!
//! let marshaler = Marshaler::for_subprotocol("actioncable-v1-json").unwrap();
//! let encoded = marshaler.marshal(&ServerMessage::welcome()).unwrap();
//! assert_eq!(encoded, br#"{"type":"welcome"}"#);
//! ```

pub mod identifiers;
pub mod marshal;
pub mod messages;
pub mod signer;

pub use identifiers::{parse_channel_name, parse_stream_name, IdentifierError};
pub use marshal::{MarshalError, Marshaler};
pub use messages::{
    ClientMessage, Command, Disconnect, Payload, ServerMessage, ServerMessageKind,
    SUBPROTOCOL_JSON, SUBPROTOCOL_MSGPACK,
};
pub use signer::{Signer, SignerConfig, SignerError};
