//! # ripple-core
//!
//! Topic hub, pattern router, and pub/sub broker for the Ripple
//! realtime framework.
//!
//! This crate provides the concurrency core:
//!
//! - **Hub** - topic registry with concurrent fan-out broadcast and
//!   broadcasting-change notifications
//! - **TopicRouter** - compressed-trie router over `/`-delimited topic
//!   patterns with `:param` and `*` segments
//! - **Broker** - routes publish/subscribe/unsubscribe events to
//!   handlers and manages per-topic publisher tasks whose lifetimes
//!   track subscriber presence
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌────────────┐     ┌────────────┐
//! │ Subscriber │────▶│   Broker   │────▶│    Hub     │
//! └────────────┘     └────────────┘     └────────────┘
//!                          │
//!                          ▼
//!                    ┌────────────┐
//!                    │TopicRouter │
//!                    └────────────┘
//! ```
//!
//! Every long-lived operation carries a
//! [`tokio_util::sync::CancellationToken`]; cancelling it tears the
//! operation down and propagates to derived tokens.

pub mod broker;
pub mod context;
pub mod handler;
pub mod hub;
pub mod router;

pub use broker::{BroadcastFn, Broker, ContextFactory};
pub use context::BrokerContext;
pub use handler::{
    apply_middleware, empty_handler, handler, middleware, DynHandler, EventContext, EventError,
    HandlerResult, Method, Middleware,
};
pub use hub::{BroadcastingChange, Hub, ReceiveFn};
pub use router::{Lookup, RouteMatch, TopicRouter};
