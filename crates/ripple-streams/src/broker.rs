//! Stream broker: the concrete pub/sub facade for page-update streams.
//!
//! Wraps the generic broker with the [`Context`] handler context and a
//! MSG event method: each batch of messages broadcast to a subscriber
//! is routed through the stream's MSG handler, which renders it into
//! the form sent to the browser.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::error;

use ripple_core::{
    BroadcastFn, Broker as CoreBroker, BrokerContext, ContextFactory, DynHandler, EventContext,
    EventError, Hub, Method, Middleware,
};

use crate::message::StreamMessage;

/// The event method for rendering broadcast messages.
pub const METHOD_MSG: Method = Method::Custom("MSG");

/// Handler context for stream events.
///
/// Wraps the broker-maintained event context; MSG handlers
/// additionally see the published messages and write their rendered
/// output through [`Context::write_rendered`].
pub struct Context {
    broker: BrokerContext<StreamMessage>,
    messages: Vec<StreamMessage>,
    rendered: Mutex<String>,
}

impl Context {
    pub(crate) fn new(broker: BrokerContext<StreamMessage>) -> Self {
        Self::with_messages(broker, Vec::new())
    }

    pub(crate) fn with_messages(
        broker: BrokerContext<StreamMessage>,
        messages: Vec<StreamMessage>,
    ) -> Self {
        Self {
            broker,
            messages,
            rendered: Mutex::new(String::new()),
        }
    }

    /// The cancellation token governing this event.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        self.broker.cancellation()
    }

    /// The stream (topic) the event was dispatched on.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.broker.topic()
    }

    /// The session attributed to the event. Valid for SUB, UNSUB, and
    /// MSG events.
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.broker.session_id()
    }

    /// The registered route pattern that matched the stream name.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.broker.pattern()
    }

    /// Look up a stream name parameter by its declared name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.broker.param(name)
    }

    /// Parse the stream name's query string into key-value pairs.
    #[must_use]
    pub fn topic_query(&self) -> HashMap<String, String> {
        self.broker.topic_query()
    }

    /// The hub the stream's broker broadcasts through.
    #[must_use]
    pub fn hub(&self) -> &Arc<Hub<Vec<StreamMessage>>> {
        self.broker.hub()
    }

    /// Broadcast messages on the event's own stream.
    pub async fn publish(&self, messages: Vec<StreamMessage>) {
        self.broker.publish(messages).await;
    }

    /// Broadcast messages on an arbitrary stream.
    pub async fn broadcast_to(&self, topic: &str, messages: Vec<StreamMessage>) {
        self.broker.broadcast_to(topic, messages).await;
    }

    /// The messages to render. Only populated for MSG events.
    #[must_use]
    pub fn published(&self) -> &[StreamMessage] {
        &self.messages
    }

    /// Append rendered output for the subscriber. Only meaningful for
    /// MSG events.
    pub fn write_rendered(&self, fragment: &str) {
        self.rendered.lock().unwrap().push_str(fragment);
    }

    fn take_rendered(&self) -> String {
        std::mem::take(&mut *self.rendered.lock().unwrap())
    }
}

impl EventContext for Context {
    fn method(&self) -> Method {
        self.broker.method()
    }

    fn topic(&self) -> &str {
        self.broker.topic()
    }
}

/// A stream event handler.
pub type StreamHandler = DynHandler<Context>;
/// Middleware over stream event handlers.
pub type StreamMiddleware = Middleware<Context>;
/// Receives each rendered broadcast for one subscription; returning
/// `false` ends the subscription.
pub type RenderedConsumer =
    Arc<dyn Fn(CancellationToken, String) -> BoxFuture<'static, bool> + Send + Sync>;

/// The pub/sub broker for page-update streams.
#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<CoreBroker<Context, StreamMessage>>,
}

impl Broker {
    /// Create a stream broker with its own hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CoreBroker::new()),
        }
    }

    /// The hub this broker broadcasts through.
    #[must_use]
    pub fn hub(&self) -> Arc<Hub<Vec<StreamMessage>>> {
        self.inner.hub()
    }

    fn context_factory() -> ContextFactory<Context, StreamMessage> {
        Arc::new(Context::new)
    }

    /// Register a route with route-level middleware.
    pub fn add(
        &self,
        method: Method,
        topic: &str,
        handler: StreamHandler,
        middleware: &[StreamMiddleware],
    ) {
        self.inner.add(method, topic, handler, middleware);
    }

    /// Register a publisher route; see [`Broker::serve`].
    pub fn on_pub(&self, topic: &str, handler: StreamHandler) {
        self.inner.on_pub(topic, handler);
    }

    /// Register a subscribe route; see [`Broker::subscribe`].
    pub fn on_sub(&self, topic: &str, handler: StreamHandler) {
        self.inner.on_sub(topic, handler);
    }

    /// Register an unsubscribe route; see [`Broker::subscribe`].
    pub fn on_unsub(&self, topic: &str, handler: StreamHandler) {
        self.inner.on_unsub(topic, handler);
    }

    /// Register a message-rendering route; its handler renders each
    /// broadcast batch via [`Context::published`] and
    /// [`Context::write_rendered`].
    pub fn on_msg(&self, topic: &str, handler: StreamHandler) {
        self.inner.add(METHOD_MSG, topic, handler, &[]);
    }

    /// Append middleware applied around every dispatched handler.
    pub fn use_middleware(&self, middleware: StreamMiddleware) {
        self.inner.use_middleware(middleware);
    }

    /// Look up and run the MSG handler for the stream, returning the
    /// rendered output.
    async fn trigger_msg(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        session_id: &str,
        messages: Vec<StreamMessage>,
    ) -> Result<String, EventError> {
        let mut rmatch = self.inner.new_route_match();
        let handler = self.inner.get_handler(&METHOD_MSG, topic, &mut rmatch);
        let context = Arc::new(Context::with_messages(
            self.inner
                .new_broker_context(ctx.clone(), METHOD_MSG, topic, session_id, rmatch),
            messages,
        ));
        handler(Arc::clone(&context)).await?;
        Ok(context.take_rendered())
    }

    /// Subscribe to a stream.
    ///
    /// The SUB handler runs first and can reject the subscription
    /// (`None`). Afterwards, every batch of messages broadcast on the
    /// stream is rendered by the MSG handler and passed to `consumer`;
    /// rendering failures are logged and that batch's output dropped.
    /// The UNSUB handler runs once after the subscription ends. The
    /// returned token is cancelled when the subscription is removed.
    pub async fn subscribe(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        session_id: &str,
        consumer: RenderedConsumer,
    ) -> Option<CancellationToken> {
        let broadcast: BroadcastFn<StreamMessage> = {
            let broker = self.clone();
            let topic = topic.to_string();
            let session_id = session_id.to_string();
            Arc::new(move |child, messages| {
                let broker = broker.clone();
                let topic = topic.clone();
                let session_id = session_id.clone();
                let consumer = Arc::clone(&consumer);
                Box::pin(async move {
                    match broker
                        .trigger_msg(&child, &topic, &session_id, messages)
                        .await
                    {
                        Ok(rendered) => consumer(child, rendered).await,
                        Err(err) => {
                            if !err.is_cancellation() {
                                error!(%topic, %err, "couldn't render messages for stream");
                            }
                            // The batch's output is dropped; the
                            // subscription itself stays.
                            true
                        }
                    }
                })
            })
        };

        self.inner
            .subscribe(ctx, topic, session_id, Self::context_factory(), broadcast)
            .await
    }

    /// Run the broker: start and stop PUB handlers as streams gain and
    /// lose subscribers, until `ctx` is cancelled.
    pub async fn serve(&self, ctx: CancellationToken) -> Result<(), EventError> {
        self.inner.serve(ctx, Self::context_factory()).await
    }
}
