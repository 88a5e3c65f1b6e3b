//! Channel dispatch: routing subscribe and action commands to channel
//! implementations by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ripple_protocol::parse_channel_name;

use crate::connection::CableHandler;
use crate::error::{BoxError, CableError};
use crate::subscription::Subscription;

/// A server-side channel: the application object behind one
/// subscription identifier.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Handle a subscribe command with the provided [`Subscription`].
    /// Returning an error rejects the subscription.
    async fn subscribe(
        &self,
        ctx: &CancellationToken,
        subscription: Subscription,
    ) -> Result<(), CableError>;

    /// Handle an action command's data payload.
    async fn perform(&self, data: &str) -> Result<(), CableError>;
}

/// Creates a [`Channel`] from a subscription identifier.
pub type ChannelFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn Channel>, CableError> + Send + Sync>;

/// Validates a subscription identifier before a channel is created;
/// e.g. CSRF-token or signed-name checks.
pub type IdentifierChecker = Arc<dyn Fn(&str) -> Result<(), BoxError> + Send + Sync>;

/// Per-connection dispatcher mapping channel names to factories and
/// live identifiers to channel instances.
pub struct ChannelDispatcher {
    factories: HashMap<String, ChannelFactory>,
    channels: HashMap<String, Arc<dyn Channel>>,
    checkers: Vec<IdentifierChecker>,
}

impl ChannelDispatcher {
    /// Create a dispatcher over the given channel factories and
    /// identifier checkers.
    #[must_use]
    pub fn new(factories: HashMap<String, ChannelFactory>, checkers: Vec<IdentifierChecker>) -> Self {
        Self {
            factories,
            channels: HashMap::new(),
            checkers,
        }
    }

    /// Parse the channel name out of the identifier and run every
    /// checker against it.
    fn check_identifier(&self, identifier: &str) -> Result<String, CableError> {
        let channel_name =
            parse_channel_name(identifier).map_err(|err| CableError::IdentifierCheck(err.into()))?;
        for checker in &self.checkers {
            checker(identifier).map_err(CableError::IdentifierCheck)?;
        }
        Ok(channel_name)
    }
}

#[async_trait]
impl CableHandler for ChannelDispatcher {
    async fn handle_subscription(
        &mut self,
        ctx: &CancellationToken,
        subscription: Subscription,
    ) -> Result<(), CableError> {
        let identifier = subscription.identifier().to_string();

        if let Some(channel) = self.channels.get(&identifier) {
            // The channel already exists; subscribe to it again.
            let channel = Arc::clone(channel);
            if let Err(err) = channel.subscribe(ctx, subscription).await {
                self.channels.remove(&identifier);
                return Err(err);
            }
            return Ok(());
        }

        let channel_name = self.check_identifier(&identifier)?;
        let factory = self
            .factories
            .get(&channel_name)
            .ok_or_else(|| CableError::UnknownChannel(channel_name.clone()))?;
        let channel = factory(&identifier)?;

        // The channel's subscribe decides whether the subscription is
        // possible, so only a successful subscribe commits the binding.
        channel.subscribe(ctx, subscription).await?;
        self.channels.insert(identifier, channel);
        Ok(())
    }

    async fn handle_action(
        &mut self,
        _ctx: &CancellationToken,
        identifier: &str,
        data: &str,
    ) -> Result<(), CableError> {
        let channel = self
            .channels
            .get(identifier)
            .ok_or_else(|| CableError::UnknownSubscription(identifier.to_string()))?;
        channel.perform(data).await
    }
}
