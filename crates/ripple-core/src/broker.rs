//! Event broker tying the hub and router together.
//!
//! The broker routes pub/sub lifecycle events (publish, subscribe,
//! unsubscribe, and custom methods such as message rendering) to
//! registered handlers, and manages one publisher task per topic whose
//! lifetime tracks subscriber presence on that topic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::context::BrokerContext;
use crate::handler::{
    apply_middleware, method_not_allowed_handler, not_found_handler, DynHandler, EventContext,
    EventError, HandlerResult, Method, Middleware,
};
use crate::hub::{BroadcastingChange, Hub, ReceiveFn};
use crate::router::{Lookup, RouteMatch, TopicRouter};

/// Builds a handler context from the broker-maintained event context.
pub type ContextFactory<C, M> = Arc<dyn Fn(BrokerContext<M>) -> C + Send + Sync>;

/// Callback invoked with each batch of messages broadcast to a broker
/// subscription. Returning `false` ends the subscription.
pub type BroadcastFn<M> =
    Arc<dyn Fn(CancellationToken, Vec<M>) -> BoxFuture<'static, bool> + Send + Sync>;

/// Routes pub/sub events to handlers and manages per-topic publishers.
///
/// `C` is the handler context type and `M` the message payload type;
/// messages travel through the hub in batches (`Vec<M>`).
pub struct Broker<C, M>
where
    C: EventContext,
    M: Clone + Send + Sync + 'static,
{
    hub: Arc<Hub<Vec<M>>>,
    router: RwLock<TopicRouter<C>>,
    middleware: RwLock<Vec<Middleware<C>>>,
    changes: Mutex<Option<mpsc::Receiver<BroadcastingChange>>>,
}

impl<C, M> Default for Broker<C, M>
where
    C: EventContext,
    M: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C, M> Broker<C, M>
where
    C: EventContext,
    M: Clone + Send + Sync + 'static,
{
    /// Create a broker with its own hub.
    #[must_use]
    pub fn new() -> Self {
        let (changes_tx, changes_rx) = mpsc::channel(1);
        Self {
            hub: Arc::new(Hub::new(Some(changes_tx))),
            router: RwLock::new(TopicRouter::new()),
            middleware: RwLock::new(Vec::new()),
            changes: Mutex::new(Some(changes_rx)),
        }
    }

    /// The hub this broker broadcasts through.
    #[must_use]
    pub fn hub(&self) -> Arc<Hub<Vec<M>>> {
        Arc::clone(&self.hub)
    }

    /// Register a route, wrapping the handler in the route-level
    /// middleware (outermost first).
    pub fn add(
        &self,
        method: Method,
        topic: &str,
        handler: DynHandler<C>,
        middleware: &[Middleware<C>],
    ) {
        let handler = apply_middleware(handler, middleware);
        self.router.write().unwrap().add(method, topic, handler);
    }

    /// Register a publisher route.
    pub fn on_pub(&self, topic: &str, handler: DynHandler<C>) {
        self.add(Method::Pub, topic, handler, &[]);
    }

    /// Register a subscribe route.
    pub fn on_sub(&self, topic: &str, handler: DynHandler<C>) {
        self.add(Method::Sub, topic, handler, &[]);
    }

    /// Register an unsubscribe route.
    pub fn on_unsub(&self, topic: &str, handler: DynHandler<C>) {
        self.add(Method::Unsub, topic, handler, &[]);
    }

    /// Append middleware applied around every dispatched handler.
    pub fn use_middleware(&self, middleware: Middleware<C>) {
        self.middleware.write().unwrap().push(middleware);
    }

    /// A match record sized for the registered routes.
    #[must_use]
    pub fn new_route_match(&self) -> RouteMatch {
        RouteMatch::with_capacity(self.router.read().unwrap().max_params())
    }

    /// Resolve the handler for a method and topic, falling back to the
    /// not-found or method-not-allowed handler, with the global
    /// middleware chain applied.
    pub fn get_handler(&self, method: &Method, topic: &str, rmatch: &mut RouteMatch) -> DynHandler<C> {
        let handler = match self.router.read().unwrap().find(method, topic, rmatch) {
            Lookup::Matched(handler) => handler,
            Lookup::MethodNotAllowed => method_not_allowed_handler(),
            Lookup::NotFound => not_found_handler(),
        };
        apply_middleware(handler, &self.middleware.read().unwrap())
    }

    /// Build the broker-maintained part of a handler context.
    #[must_use]
    pub fn new_broker_context(
        &self,
        cancel: CancellationToken,
        method: Method,
        topic: &str,
        session_id: &str,
        route: RouteMatch,
    ) -> BrokerContext<M> {
        BrokerContext::new(cancel, method, topic, session_id, route, self.hub())
    }

    /// Synchronously run the subscribe handler for the topic. Errors
    /// other than cancellation are logged and returned.
    pub async fn trigger_sub(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        session_id: &str,
        factory: &ContextFactory<C, M>,
    ) -> HandlerResult {
        let mut rmatch = self.new_route_match();
        let handler = self.get_handler(&Method::Sub, topic, &mut rmatch);
        let context = Arc::new(factory(self.new_broker_context(
            ctx.clone(),
            Method::Sub,
            topic,
            session_id,
            rmatch,
        )));
        let result = handler(context).await;
        if let Err(err) = &result {
            if !err.is_cancellation() {
                error!(topic, %err, "couldn't handle subscribe on topic");
            }
        }
        result
    }

    /// Synchronously run the unsubscribe handler for the topic. Errors
    /// other than cancellation are logged but not surfaced.
    pub async fn trigger_unsub(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        session_id: &str,
        factory: &ContextFactory<C, M>,
    ) {
        let mut rmatch = self.new_route_match();
        let handler = self.get_handler(&Method::Unsub, topic, &mut rmatch);
        let context = Arc::new(factory(self.new_broker_context(
            ctx.clone(),
            Method::Unsub,
            topic,
            session_id,
            rmatch,
        )));
        if let Err(err) = handler(context).await {
            if !err.is_cancellation() {
                error!(topic, %err, "couldn't handle unsubscribe on topic");
            }
        }
    }

    /// Add a hub subscription gated by the subscribe handler.
    ///
    /// The subscribe handler runs first; if it errors the subscription
    /// is rejected and `None` is returned. Otherwise each broadcast on
    /// the topic invokes `broadcast_handler` under a child token of
    /// `ctx`, and the unsubscribe handler runs exactly once after the
    /// subscription ends. The returned token is cancelled when the
    /// subscription is removed from the hub.
    pub async fn subscribe(
        self: &Arc<Self>,
        ctx: &CancellationToken,
        topic: &str,
        session_id: &str,
        factory: ContextFactory<C, M>,
        broadcast_handler: BroadcastFn<M>,
    ) -> Option<CancellationToken> {
        if self
            .trigger_sub(ctx, topic, session_id, &factory)
            .await
            .is_err()
        {
            return None;
        }

        let child = ctx.child_token();
        let receive: ReceiveFn<Vec<M>> = {
            let child = child.clone();
            Arc::new(move |messages| {
                let child = child.clone();
                let handle = Arc::clone(&broadcast_handler);
                Box::pin(async move { handle(child, messages).await })
            })
        };
        let done = self.hub.subscribe(&child, topic, receive).await;

        let broker = Arc::clone(self);
        let finished = done.clone();
        let topic = topic.to_string();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            finished.cancelled().await;
            // The unsubscribe handler observes the subscription's own,
            // by-now-cancelled token.
            child.cancel();
            broker
                .trigger_unsub(&child, &topic, &session_id, &factory)
                .await;
        });

        Some(done)
    }

    /// Run the broker: close the hub when `ctx` is cancelled, and start
    /// and stop per-topic publisher tasks as topics gain and lose
    /// subscribers. Returns when the hub's change channel closes.
    ///
    /// The publisher cancel map is owned by this task alone.
    pub async fn serve(
        self: &Arc<Self>,
        ctx: CancellationToken,
        factory: ContextFactory<C, M>,
    ) -> Result<(), EventError> {
        let mut changes = self
            .changes
            .lock()
            .await
            .take()
            .ok_or_else(|| EventError::handler("broker is already serving"))?;

        {
            let hub = self.hub();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.cancelled().await;
                hub.close().await;
            });
        }

        let mut publishers: HashMap<String, CancellationToken> = HashMap::new();
        while let Some(change) = changes.recv().await {
            for topic in change.added {
                if publishers.contains_key(&topic) {
                    continue;
                }
                self.start_publisher(&ctx, &mut publishers, topic, &factory);
            }
            for topic in change.removed {
                if let Some(cancel) = publishers.remove(&topic) {
                    cancel.cancel();
                }
            }
        }

        if ctx.is_cancelled() {
            Err(EventError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Start the publisher handler for a topic in a background task and
    /// record its cancel token, provided a publisher route matches.
    fn start_publisher(
        self: &Arc<Self>,
        serve_ctx: &CancellationToken,
        publishers: &mut HashMap<String, CancellationToken>,
        topic: String,
        factory: &ContextFactory<C, M>,
    ) {
        let mut rmatch = self.new_route_match();
        let handler = match self.router.read().unwrap().find(&Method::Pub, &topic, &mut rmatch) {
            Lookup::Matched(handler) => {
                apply_middleware(handler, &self.middleware.read().unwrap())
            }
            Lookup::MethodNotAllowed | Lookup::NotFound => {
                debug!(%topic, "no publisher registered for topic");
                return;
            }
        };

        let cancel = serve_ctx.child_token();
        publishers.insert(topic.clone(), cancel.clone());
        let context = Arc::new(factory(self.new_broker_context(
            cancel,
            Method::Pub,
            &topic,
            "",
            rmatch,
        )));
        tokio::spawn(async move {
            debug!(%topic, "publisher started");
            if let Err(err) = handler(context).await {
                if !err.is_cancellation() {
                    error!(%topic, %err, "publisher handler failed");
                }
            }
            debug!(%topic, "publisher finished");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{empty_handler, handler};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::sleep;

    type TestBroker = Broker<BrokerContext<String>, String>;

    fn identity_factory() -> ContextFactory<BrokerContext<String>, String> {
        Arc::new(|bc| bc)
    }

    fn collecting_consumer(
        received: Arc<StdMutex<Vec<String>>>,
    ) -> BroadcastFn<String> {
        Arc::new(move |_ctx, messages| {
            let received = Arc::clone(&received);
            Box::pin(async move {
                received.lock().unwrap().extend(messages);
                true
            })
        })
    }

    #[tokio::test]
    async fn two_subscribers_receive_a_broadcast() {
        let broker: Arc<TestBroker> = Arc::new(Broker::new());
        let seen_param = Arc::new(StdMutex::new(Vec::new()));
        {
            let seen_param = Arc::clone(&seen_param);
            broker.on_sub(
                "/room/:id",
                handler(move |c: Arc<BrokerContext<String>>| {
                    let seen_param = Arc::clone(&seen_param);
                    Box::pin(async move {
                        seen_param
                            .lock()
                            .unwrap()
                            .push(c.param("id").unwrap_or("").to_string());
                        Ok(())
                    })
                }),
            );
        }
        broker.on_unsub("/room/:id", empty_handler());

        let ctx = CancellationToken::new();
        let first = Arc::new(StdMutex::new(Vec::new()));
        let second = Arc::new(StdMutex::new(Vec::new()));
        broker
            .subscribe(
                &ctx,
                "/room/42",
                "s1",
                identity_factory(),
                collecting_consumer(Arc::clone(&first)),
            )
            .await
            .expect("subscription accepted");
        broker
            .subscribe(
                &ctx,
                "/room/42",
                "s2",
                identity_factory(),
                collecting_consumer(Arc::clone(&second)),
            )
            .await
            .expect("subscription accepted");

        broker.hub().broadcast("/room/42", vec!["M1".to_string()]).await;

        assert_eq!(*first.lock().unwrap(), vec!["M1".to_string()]);
        assert_eq!(*second.lock().unwrap(), vec!["M1".to_string()]);
        assert_eq!(
            *seen_param.lock().unwrap(),
            vec!["42".to_string(), "42".to_string()]
        );
    }

    #[tokio::test]
    async fn rejected_subscription_returns_none() {
        let broker: Arc<TestBroker> = Arc::new(Broker::new());
        broker.on_sub(
            "/private",
            handler(|_c: Arc<BrokerContext<String>>| {
                Box::pin(async { Err(EventError::handler("not allowed")) })
            }),
        );

        let ctx = CancellationToken::new();
        let received = Arc::new(StdMutex::new(Vec::new()));
        let done = broker
            .subscribe(
                &ctx,
                "/private",
                "s1",
                identity_factory(),
                collecting_consumer(Arc::clone(&received)),
            )
            .await;
        assert!(done.is_none());

        broker.hub().broadcast("/private", vec!["M1".to_string()]).await;
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_consumer_unsubscribes_and_runs_unsub() {
        let broker: Arc<TestBroker> = Arc::new(Broker::new());
        // Drain change events so subscription removal can proceed.
        {
            let broker = Arc::clone(&broker);
            let serve_ctx = CancellationToken::new();
            tokio::spawn(async move { broker.serve(serve_ctx, identity_factory()).await });
        }
        broker.on_sub("/t", empty_handler());
        let unsubscribed = Arc::new(AtomicBool::new(false));
        {
            let unsubscribed = Arc::clone(&unsubscribed);
            broker.on_unsub(
                "/t",
                handler(move |_c: Arc<BrokerContext<String>>| {
                    let unsubscribed = Arc::clone(&unsubscribed);
                    Box::pin(async move {
                        unsubscribed.store(true, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            );
        }

        let ctx = CancellationToken::new();
        let deliveries = Arc::new(AtomicUsize::new(0));
        let failing: BroadcastFn<String> = {
            let deliveries = Arc::clone(&deliveries);
            Arc::new(move |_ctx, _messages| {
                let deliveries = Arc::clone(&deliveries);
                Box::pin(async move {
                    deliveries.fetch_add(1, Ordering::SeqCst);
                    false
                })
            })
        };
        let done = broker
            .subscribe(&ctx, "/t", "s1", identity_factory(), failing)
            .await
            .expect("subscription accepted");

        broker.hub().broadcast("/t", vec!["M1".to_string()]).await;
        assert!(done.is_cancelled());

        // The unsubscribe handler runs from a spawned task.
        sleep(Duration::from_millis(50)).await;
        assert!(unsubscribed.load(Ordering::SeqCst));

        // A follow-up broadcast reaches nobody.
        broker.hub().broadcast("/t", vec!["M2".to_string()]).await;
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publisher_runs_while_topic_has_subscribers() {
        let broker: Arc<TestBroker> = Arc::new(Broker::new());
        broker.on_sub("/feed", empty_handler());
        broker.on_unsub("/feed", empty_handler());

        let ticks = Arc::new(AtomicUsize::new(0));
        {
            let ticks = Arc::clone(&ticks);
            broker.on_pub(
                "/feed",
                handler(move |c: Arc<BrokerContext<String>>| {
                    let ticks = Arc::clone(&ticks);
                    Box::pin(async move {
                        let cancelled = c.cancellation().clone();
                        loop {
                            tokio::select! {
                                () = cancelled.cancelled() => return Ok(()),
                                () = sleep(Duration::from_millis(10)) => {
                                    ticks.fetch_add(1, Ordering::SeqCst);
                                    c.publish(vec!["tick".to_string()]).await;
                                }
                            }
                        }
                    })
                }),
            );
        }

        let serve_ctx = CancellationToken::new();
        let serving = {
            let broker = Arc::clone(&broker);
            let serve_ctx = serve_ctx.clone();
            tokio::spawn(async move { broker.serve(serve_ctx, identity_factory()).await })
        };

        let sub_ctx = CancellationToken::new();
        let received = Arc::new(StdMutex::new(Vec::new()));
        broker
            .subscribe(
                &sub_ctx,
                "/feed",
                "s1",
                identity_factory(),
                collecting_consumer(Arc::clone(&received)),
            )
            .await
            .expect("subscription accepted");

        sleep(Duration::from_millis(100)).await;
        assert!(ticks.load(Ordering::SeqCst) > 0);
        assert!(!received.lock().unwrap().is_empty());

        // Dropping the only subscriber stops the publisher within one
        // change-event cycle.
        sub_ctx.cancel();
        sleep(Duration::from_millis(50)).await;
        let after_cancel = ticks.load(Ordering::SeqCst);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);

        serve_ctx.cancel();
        let result = serving.await.unwrap();
        assert!(matches!(result, Err(EventError::Cancelled)));
    }

    #[tokio::test]
    async fn global_middleware_wraps_every_dispatch() {
        let broker: Arc<TestBroker> = Arc::new(Broker::new());
        let wrapped_calls = Arc::new(AtomicUsize::new(0));
        {
            let wrapped_calls = Arc::clone(&wrapped_calls);
            broker.use_middleware(crate::handler::middleware(move |next| {
                let wrapped_calls = Arc::clone(&wrapped_calls);
                handler(move |c: Arc<BrokerContext<String>>| {
                    let next = Arc::clone(&next);
                    wrapped_calls.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async move { next(c).await })
                })
            }));
        }
        broker.on_sub("/t", empty_handler());

        let ctx = CancellationToken::new();
        broker
            .trigger_sub(&ctx, "/t", "s1", &identity_factory())
            .await
            .unwrap();
        assert_eq!(wrapped_calls.load(Ordering::SeqCst), 1);

        // Middleware also wraps the fallback for unrouted topics.
        let result = broker
            .trigger_sub(&ctx, "/unrouted", "s1", &identity_factory())
            .await;
        assert!(matches!(result, Err(EventError::NotFound(_))));
        assert_eq!(wrapped_calls.load(Ordering::SeqCst), 2);
    }
}
