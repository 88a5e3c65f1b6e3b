//! Per-event context handed to broker handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::handler::{EventContext, Method};
use crate::hub::Hub;
use crate::router::RouteMatch;

/// The context of a single dispatched broker event: the cancellation
/// token governing the event, the method and topic it was dispatched
/// on, the session attributed to it, the router match, and a handle to
/// the hub for publishing.
pub struct BrokerContext<M>
where
    M: Clone + Send + Sync + 'static,
{
    cancel: CancellationToken,
    method: Method,
    topic: String,
    session_id: String,
    route: RouteMatch,
    hub: Arc<Hub<Vec<M>>>,
}

impl<M> BrokerContext<M>
where
    M: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        cancel: CancellationToken,
        method: Method,
        topic: &str,
        session_id: &str,
        route: RouteMatch,
        hub: Arc<Hub<Vec<M>>>,
    ) -> Self {
        Self {
            cancel,
            method,
            topic: topic.to_string(),
            session_id: session_id.to_string(),
            route,
            hub,
        }
    }

    /// The cancellation token governing this event.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The event method being handled.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// The topic the event was dispatched on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The session attributed to the event, or `""` for events without
    /// a session (such as managed publishers).
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The registered route pattern that matched the topic.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.route.pattern()
    }

    /// Look up a topic path parameter by its declared name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.route.param(name)
    }

    /// The declared parameter names of the matched route.
    #[must_use]
    pub fn param_names(&self) -> &[String] {
        self.route.param_names()
    }

    /// The extracted parameter values, one per declared name.
    #[must_use]
    pub fn param_values(&self) -> &[String] {
        self.route.param_values()
    }

    /// Parse the topic's query string (the part after `?`, when the
    /// topic is shaped like a URI) into key-value pairs.
    #[must_use]
    pub fn topic_query(&self) -> HashMap<String, String> {
        let Some((_, query)) = self.topic.split_once('?') else {
            return HashMap::new();
        };
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// The hub this event's broker broadcasts through.
    #[must_use]
    pub fn hub(&self) -> &Arc<Hub<Vec<M>>> {
        &self.hub
    }

    /// Broadcast messages on the event's own topic.
    pub async fn publish(&self, messages: Vec<M>) {
        self.hub.broadcast(&self.topic, messages).await;
    }

    /// Broadcast messages on an arbitrary topic.
    pub async fn broadcast_to(&self, topic: &str, messages: Vec<M>) {
        self.hub.broadcast(topic, messages).await;
    }
}

impl<M> EventContext for BrokerContext<M>
where
    M: Clone + Send + Sync + 'static,
{
    fn method(&self) -> Method {
        self.method
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Lookup, TopicRouter};
    use crate::DynHandler;

    fn context_for(topic: &str, pattern: &str) -> BrokerContext<String> {
        let mut router: TopicRouter<BrokerContext<String>> = TopicRouter::new();
        let h: DynHandler<BrokerContext<String>> =
            crate::handler::handler(|_c| Box::pin(async { Ok(()) }));
        router.add(Method::Sub, pattern, h);

        let mut route = RouteMatch::with_capacity(router.max_params());
        assert!(matches!(
            router.find(&Method::Sub, topic, &mut route),
            Lookup::Matched(_)
        ));

        BrokerContext::new(
            CancellationToken::new(),
            Method::Sub,
            topic,
            "session-1",
            route,
            Arc::new(Hub::new(None)),
        )
    }

    #[test]
    fn exposes_route_parameters() {
        let c = context_for("/rooms/42", "/rooms/:id");
        assert_eq!(c.method(), Method::Sub);
        assert_eq!(c.topic(), "/rooms/42");
        assert_eq!(c.pattern(), "/rooms/:id");
        assert_eq!(c.param("id"), Some("42"));
        assert_eq!(c.param("missing"), None);
        assert_eq!(c.session_id(), "session-1");
    }

    #[test]
    fn parses_topic_query() {
        let c = context_for("/rooms/42?since=7&name=a%20b", "/rooms/:id");
        let query = c.topic_query();
        assert_eq!(query.get("since").map(String::as_str), Some("7"));
        assert_eq!(query.get("name").map(String::as_str), Some("a b"));

        let c = context_for("/rooms/42", "/rooms/:id");
        assert!(c.topic_query().is_empty());
    }
}
