//! # ripple-cable
//!
//! Server-side implementation of the Action Cable protocol
//! (<https://docs.anycable.io/misc/action_cable_protocol>) for the
//! Ripple realtime framework.
//!
//! A [`Connection`] multiplexes named channel subscriptions over one
//! WebSocket, sending periodic heartbeats and dispatching subscribe,
//! unsubscribe, and action commands to a [`CableHandler`], usually a
//! [`ChannelDispatcher`] that instantiates [`Channel`]s by name. The
//! [`Cancellers`] registry lets the application tear down every
//! subscription belonging to a session at once.

pub mod cancellers;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod socket;
pub mod subscription;

pub use cancellers::Cancellers;
pub use connection::{CableHandler, Connection};
pub use dispatcher::{Channel, ChannelDispatcher, ChannelFactory, IdentifierChecker};
pub use error::{default_error_sanitizer, BoxError, CableError, ErrorSanitizer};
pub use socket::{
    is_normal_close_code, split_websocket, SocketError, SocketFrame, SocketSink, SocketStream,
};
pub use subscription::Subscription;
