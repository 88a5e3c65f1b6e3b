//! Handler and middleware machinery for broker events.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;

/// A broker event method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Managed-publisher events, started and stopped by the broker
    /// serve loop as topics gain and lose subscribers.
    Pub,
    /// Subscription events, dispatched before a subscription is added.
    Sub,
    /// Unsubscription events, dispatched after a subscription ends.
    Unsub,
    /// Any additional event method, such as message rendering.
    Custom(&'static str),
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Pub => f.write_str("PUB"),
            Method::Sub => f.write_str("SUB"),
            Method::Unsub => f.write_str("UNSUB"),
            Method::Custom(name) => f.write_str(name),
        }
    }
}

/// Errors produced while dispatching broker events.
#[derive(Debug, Error)]
pub enum EventError {
    /// No route matched the topic.
    #[error("no handler registered for topic {0}")]
    NotFound(String),

    /// A route matched the topic but not the method.
    #[error("no {0} handler registered for topic {1}")]
    MethodNotAllowed(Method, String),

    /// The event's context was cancelled; orderly shutdown, not a fault.
    #[error("event cancelled")]
    Cancelled,

    /// An error returned by a user-supplied handler.
    #[error("{0}")]
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl EventError {
    /// Wrap an arbitrary handler error.
    pub fn handler(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Handler(err.into())
    }

    /// Whether this error represents orderly cancellation rather than a
    /// fault; cancellation is suppressed instead of logged.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The outcome of a dispatched handler.
pub type HandlerResult = Result<(), EventError>;

/// A type-erased event handler.
///
/// Handlers receive a shared handle to the event context; mutable event
/// state (such as a rendered-output buffer) lives behind interior
/// mutability on the context type.
pub type DynHandler<C> = Arc<dyn Fn(Arc<C>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A middleware wraps a handler to produce a new handler.
pub type Middleware<C> = Arc<dyn Fn(DynHandler<C>) -> DynHandler<C> + Send + Sync>;

/// Capabilities every broker handler context provides.
pub trait EventContext: Send + Sync + 'static {
    /// The event method being dispatched.
    fn method(&self) -> Method;
    /// The topic the event was dispatched on.
    fn topic(&self) -> &str;
}

/// Erase a handler closure into a [`DynHandler`].
pub fn handler<C, F>(f: F) -> DynHandler<C>
where
    F: Fn(Arc<C>) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A handler which accepts every event and does nothing.
#[must_use]
pub fn empty_handler<C: Send + Sync + 'static>() -> DynHandler<C> {
    Arc::new(|_c: Arc<C>| -> BoxFuture<'static, HandlerResult> { Box::pin(async { Ok(()) }) })
}

/// Erase a middleware closure into a [`Middleware`].
pub fn middleware<C, F>(f: F) -> Middleware<C>
where
    F: Fn(DynHandler<C>) -> DynHandler<C> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap the handler in the middlewares, outermost first.
pub fn apply_middleware<C>(handler: DynHandler<C>, middleware: &[Middleware<C>]) -> DynHandler<C> {
    middleware.iter().rev().fold(handler, |h, m| m(h))
}

/// Fallback handler for topics with no matching route.
pub(crate) fn not_found_handler<C: EventContext>() -> DynHandler<C> {
    Arc::new(|c: Arc<C>| -> BoxFuture<'static, HandlerResult> {
        Box::pin(async move { Err(EventError::NotFound(c.topic().to_string())) })
    })
}

/// Fallback handler for topics whose route lacks the event's method.
pub(crate) fn method_not_allowed_handler<C: EventContext>() -> DynHandler<C> {
    Arc::new(|c: Arc<C>| -> BoxFuture<'static, HandlerResult> {
        Box::pin(async move {
            Err(EventError::MethodNotAllowed(c.method(), c.topic().to_string()))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestContext {
        topic: String,
        order: std::sync::Mutex<Vec<&'static str>>,
    }

    impl EventContext for TestContext {
        fn method(&self) -> Method {
            Method::Sub
        }
        fn topic(&self) -> &str {
            &self.topic
        }
    }

    #[tokio::test]
    async fn middleware_applies_outermost_first() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = {
            let calls = Arc::clone(&calls);
            handler(move |c: Arc<TestContext>| {
                let calls = Arc::clone(&calls);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    c.order.lock().unwrap().push("handler");
                    Ok(())
                })
            })
        };

        let tag = |name: &'static str| -> Middleware<TestContext> {
            middleware(move |next: DynHandler<TestContext>| {
                handler(move |c: Arc<TestContext>| {
                    let next = Arc::clone(&next);
                    Box::pin(async move {
                        c.order.lock().unwrap().push(name);
                        next(c).await
                    })
                })
            })
        };

        let wrapped = apply_middleware(inner, &[tag("outer"), tag("inner")]);
        let ctx = Arc::new(TestContext {
            topic: "/t".to_string(),
            order: std::sync::Mutex::new(Vec::new()),
        });
        wrapped(Arc::clone(&ctx)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *ctx.order.lock().unwrap(),
            vec!["outer", "inner", "handler"]
        );
    }
}
