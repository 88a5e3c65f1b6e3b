//! Topic hub for in-process pub/sub fan-out.
//!
//! The hub keeps a registry of topics and the subscriptions attached to
//! them. Broadcasting a message on a topic invokes every subscription's
//! receive callback concurrently and waits for all of them to finish.
//! Whenever the set of topics with at least one subscription gains or
//! loses a member, the hub emits a [`BroadcastingChange`] on its change
//! channel so a broker can start and stop per-topic publishers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Callback invoked with each message broadcast on a subscribed topic.
///
/// Returning `false` removes the subscription from the hub.
pub type ReceiveFn<M> = Arc<dyn Fn(M) -> BoxFuture<'static, bool> + Send + Sync>;

/// A change to the set of topics with at least one subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastingChange {
    /// Topics which went from zero subscriptions to at least one.
    pub added: Vec<String>,
    /// Topics which went from at least one subscription to zero.
    pub removed: Vec<String>,
}

impl BroadcastingChange {
    /// Create a change event for newly-populated topics.
    #[must_use]
    pub fn added(topics: Vec<String>) -> Self {
        Self {
            added: topics,
            removed: Vec::new(),
        }
    }

    /// Create a change event for newly-emptied topics.
    #[must_use]
    pub fn removed(topics: Vec<String>) -> Self {
        Self {
            added: Vec::new(),
            removed: topics,
        }
    }
}

struct Receiver<M> {
    receive: ReceiveFn<M>,
    /// Cancelled exactly once, when the subscription is removed.
    done: CancellationToken,
}

struct HubState<M> {
    /// Topic name to the subscriptions currently attached to it. A topic
    /// is present iff it has at least one subscription.
    broadcastings: HashMap<String, HashMap<u64, Receiver<M>>>,
    /// Change events are sent while the exclusive lock is held, so that
    /// add/remove cycles on a topic are observed in order. The reader is
    /// expected to drain promptly (the broker serve loop does).
    changes: Option<mpsc::Sender<BroadcastingChange>>,
    closed: bool,
}

/// Coordinates broadcasting of messages between publishers and
/// subscribers, keyed by topic.
pub struct Hub<M> {
    state: RwLock<HubState<M>>,
    next_id: AtomicU64,
}

impl<M> Hub<M>
where
    M: Clone + Send + Sync + 'static,
{
    /// Create a hub. When a change sender is provided, the hub reports
    /// transitions of the topic set on it; the channel is closed by
    /// [`Hub::close`].
    #[must_use]
    pub fn new(changes: Option<mpsc::Sender<BroadcastingChange>>) -> Self {
        Self {
            state: RwLock::new(HubState {
                broadcastings: HashMap::new(),
                changes,
                closed: false,
            }),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a subscription on a topic.
    ///
    /// The returned token is cancelled exactly once, when the
    /// subscription is removed: because `ctx` was cancelled, because
    /// `receive` returned `false` during a broadcast, because the topic
    /// was cancelled wholesale, or because the hub closed. After the
    /// returned token fires, `receive` is never invoked again.
    pub async fn subscribe(
        self: &Arc<Self>,
        ctx: &CancellationToken,
        topic: &str,
        receive: ReceiveFn<M>,
    ) -> CancellationToken {
        let done = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.state.write().await;
            if state.closed {
                done.cancel();
                return done;
            }

            let added = !state.broadcastings.contains_key(topic);
            state
                .broadcastings
                .entry(topic.to_string())
                .or_default()
                .insert(
                    id,
                    Receiver {
                        receive,
                        done: done.clone(),
                    },
                );
            debug!(topic, id, "subscription added");

            if added {
                if let Some(changes) = state.changes.clone() {
                    // Sent under the exclusive lock; see HubState::changes.
                    let _ = changes.send(BroadcastingChange::added(vec![topic.to_string()])).await;
                }
            }
        }

        let hub = Arc::clone(self);
        let parent = ctx.clone();
        let watched = done.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = parent.cancelled() => hub.remove(&[(topic, id)]).await,
                () = watched.cancelled() => {}
            }
        });

        done
    }

    /// Broadcast a message to every subscription on the topic.
    ///
    /// The subscriber set is snapshotted under the read lock, which is
    /// held until every receive callback has returned; subscriptions
    /// whose callbacks report failure (or panic) are removed afterwards.
    /// Broadcasting on an unknown topic, or after [`Hub::close`], does
    /// nothing.
    pub async fn broadcast(&self, topic: &str, message: M) {
        let mut failed = Vec::new();
        {
            let state = self.state.read().await;
            let Some(broadcasting) = state.broadcastings.get(topic) else {
                debug!(topic, "broadcast on topic without subscriptions");
                return;
            };

            let mut tasks = JoinSet::new();
            for (&id, receiver) in broadcasting {
                let receive = Arc::clone(&receiver.receive);
                let message = message.clone();
                tasks.spawn(async move {
                    // A panicking callback only takes down its own subscription.
                    let ok = std::panic::AssertUnwindSafe(receive(message))
                        .catch_unwind()
                        .await
                        .unwrap_or(false);
                    (id, ok)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, true)) => {}
                    Ok((id, false)) => failed.push((topic.to_string(), id)),
                    Err(err) => warn!(topic, %err, "broadcast receiver task failed"),
                }
            }
        }

        if !failed.is_empty() {
            for (_, id) in &failed {
                warn!(topic, id, "removing subscription after receive failure");
            }
            self.remove(&failed).await;
        }
    }

    /// Cancel and remove every subscription on the given topics,
    /// emitting a single change event listing the topics which actually
    /// had subscriptions.
    pub async fn cancel(&self, topics: &[&str]) {
        let mut state = self.state.write().await;
        if state.closed {
            return;
        }

        let mut removed = Vec::new();
        for &topic in topics {
            let Some(broadcasting) = state.broadcastings.remove(topic) else {
                continue;
            };
            for receiver in broadcasting.into_values() {
                receiver.done.cancel();
            }
            removed.push(topic.to_string());
        }

        if !removed.is_empty() {
            if let Some(changes) = state.changes.clone() {
                let _ = changes.send(BroadcastingChange::removed(removed)).await;
            }
        }
    }

    /// Cancel every subscription, close the change channel, and render
    /// the hub inert. Operations after close are no-ops.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        if state.closed {
            return;
        }

        for broadcasting in state.broadcastings.values() {
            for receiver in broadcasting.values() {
                receiver.done.cancel();
            }
        }
        state.broadcastings.clear();
        // Dropping the sender closes the change channel for its reader.
        state.changes = None;
        state.closed = true;
        debug!("hub closed");
    }

    /// Remove specific subscriptions, cancelling their done tokens and
    /// emitting a change event for any topics which became empty.
    async fn remove(&self, subscriptions: &[(String, u64)]) {
        if subscriptions.is_empty() {
            return;
        }

        let mut state = self.state.write().await;
        if state.closed {
            return;
        }

        let mut removed_topics = Vec::new();
        for (topic, id) in subscriptions {
            let Some(broadcasting) = state.broadcastings.get_mut(topic) else {
                continue;
            };
            let Some(receiver) = broadcasting.remove(id) else {
                continue;
            };
            if broadcasting.is_empty() {
                state.broadcastings.remove(topic);
                removed_topics.push(topic.clone());
            }
            receiver.done.cancel();
            debug!(%topic, id, "subscription removed");
        }

        if !removed_topics.is_empty() {
            if let Some(changes) = state.changes.clone() {
                let _ = changes.send(BroadcastingChange::removed(removed_topics)).await;
            }
        }
    }
}
