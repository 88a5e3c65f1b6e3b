//! # ripple-streams
//!
//! Page-update streams over the Ripple broker and cable protocol.
//!
//! A [`Broker`] routes stream lifecycle events (PUB/SUB/UNSUB) and
//! renders broadcast messages through per-stream MSG handlers; a
//! [`StreamsChannel`] exposes each stream as a cable channel, so every
//! WebSocket subscription becomes a broker subscription whose rendered
//! output is pushed to the browser.
//!
//! Stream names are signed: subscription identifiers carry
//! `{"name", "integrity"}` pairs checked against the server's HMAC key
//! (see [`ripple_protocol::Signer`]) before a channel is created.

pub mod broker;
pub mod channel;
pub mod message;

pub use broker::{
    Broker, Context, RenderedConsumer, StreamHandler, StreamMiddleware, METHOD_MSG,
};
pub use channel::{streams_channel_factory, StreamsChannel, CHANNEL_NAME};
pub use message::{StreamAction, StreamMessage};
