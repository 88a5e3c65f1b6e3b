//! The server end of a channel subscription.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ripple_protocol::ServerMessage;

use crate::error::CableError;

/// A handle for pushing data messages to one channel subscription on a
/// connection. Handles share the connection's bounded outbound queue;
/// sends block until the send loop takes the message.
///
/// Normally created by the connection when dispatching a subscribe
/// command.
#[derive(Clone)]
pub struct Subscription {
    identifier: String,
    to_client: mpsc::Sender<ServerMessage>,
}

impl Subscription {
    /// Create a subscription handle enqueueing onto the given outbound
    /// queue.
    #[must_use]
    pub fn new(identifier: String, to_client: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            identifier,
            to_client,
        }
    }

    /// The subscription identifier string.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Enqueue a text message for the subscriber, blocking until it is
    /// queued or the context is cancelled.
    pub async fn send_text(
        &self,
        ctx: &CancellationToken,
        message: impl Into<String>,
    ) -> Result<(), CableError> {
        self.enqueue(
            ctx,
            ServerMessage::data_text(self.identifier.clone(), message.into()),
        )
        .await
    }

    /// Enqueue a binary message for the subscriber, blocking until it
    /// is queued or the context is cancelled.
    pub async fn send_bytes(
        &self,
        ctx: &CancellationToken,
        message: Vec<u8>,
    ) -> Result<(), CableError> {
        self.enqueue(
            ctx,
            ServerMessage::data_bytes(self.identifier.clone(), message),
        )
        .await
    }

    /// Release the subscription. No rejection is sent; clients that
    /// unsubscribe normally expect silence. The outbound queue stays
    /// open for the connection's other subscriptions.
    pub fn close(&self) {}

    async fn enqueue(
        &self,
        ctx: &CancellationToken,
        message: ServerMessage,
    ) -> Result<(), CableError> {
        tokio::select! {
            () = ctx.cancelled() => Err(CableError::Cancelled),
            sent = self.to_client.send(message) => {
                sent.map_err(|_| CableError::Cancelled)?;
                if ctx.is_cancelled() {
                    // The context was cancelled while we were enqueued;
                    // it takes priority over the successful send.
                    return Err(CableError::Cancelled);
                }
                Ok(())
            }
        }
    }
}
