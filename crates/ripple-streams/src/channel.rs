//! The cable channel bridging stream subscriptions to the broker.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ripple_cable::{
    CableError, Channel, ChannelFactory, IdentifierChecker, Subscription,
};
use ripple_protocol::parse_stream_name;

use crate::broker::{Broker, RenderedConsumer};

/// The cable channel name stream subscriptions address.
pub const CHANNEL_NAME: &str = "Turbo::StreamsChannel";

/// A cable channel for one signed stream name.
///
/// Subscribing bridges the cable subscription to a broker
/// subscription: each broadcast on the stream is rendered by the
/// broker's MSG handler and pushed to the client as a data message.
/// The channel is streaming-only; it performs no actions.
pub struct StreamsChannel {
    identifier: String,
    stream_name: String,
    broker: Broker,
    session_id: String,
}

impl StreamsChannel {
    /// Check the identifier with the given checkers and create the
    /// channel for its stream.
    pub fn new(
        identifier: &str,
        broker: Broker,
        session_id: &str,
        checkers: &[IdentifierChecker],
    ) -> Result<Self, CableError> {
        let stream_name =
            parse_stream_name(identifier).map_err(|err| CableError::IdentifierCheck(err.into()))?;
        for checker in checkers {
            checker(identifier).map_err(CableError::IdentifierCheck)?;
        }
        Ok(Self {
            identifier: identifier.to_string(),
            stream_name,
            broker,
            session_id: session_id.to_string(),
        })
    }

    /// The stream this channel subscribes to.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }
}

#[async_trait]
impl Channel for StreamsChannel {
    async fn subscribe(
        &self,
        ctx: &CancellationToken,
        subscription: Subscription,
    ) -> Result<(), CableError> {
        if subscription.identifier() != self.identifier {
            return Err(CableError::Other(format!(
                "channel identifier {} does not match subscription identifier {}",
                self.identifier,
                subscription.identifier()
            )));
        }

        let consumer: RenderedConsumer = {
            let subscription = subscription.clone();
            Arc::new(move |cctx, rendered| {
                let subscription = subscription.clone();
                Box::pin(async move { subscription.send_text(&cctx, rendered).await.is_ok() })
            })
        };

        let Some(finished) = self
            .broker
            .subscribe(ctx, &self.stream_name, &self.session_id, consumer)
            .await
        else {
            return Err(CableError::SubscriptionRejected);
        };

        tokio::spawn(async move {
            finished.cancelled().await;
            subscription.close();
        });
        Ok(())
    }

    async fn perform(&self, _data: &str) -> Result<(), CableError> {
        Err(CableError::Other(
            "streams channel cannot perform any actions".to_string(),
        ))
    }
}

/// Build the cable channel factory for stream subscriptions, bound to
/// one connection's session.
#[must_use]
pub fn streams_channel_factory(
    broker: Broker,
    session_id: String,
    checkers: Vec<IdentifierChecker>,
) -> ChannelFactory {
    Arc::new(move |identifier| {
        let channel = StreamsChannel::new(identifier, broker.clone(), &session_id, &checkers)?;
        Ok(Arc::new(channel) as Arc<dyn Channel>)
    })
}
