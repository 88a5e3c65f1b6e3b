//! Per-connection protocol engine.
//!
//! A connection runs two cooperating loops: the receive loop reads and
//! dispatches client commands, and the send loop multiplexes WebSocket
//! pings, cable pings, and queued server messages onto the socket.
//! Either loop ending cancels the other; teardown then cancels every
//! subscription, sends a best-effort disconnect message, and closes
//! the socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ripple_protocol::{ClientMessage, Command, Disconnect, Marshaler, ServerMessage};

use crate::error::{default_error_sanitizer, CableError, ErrorSanitizer};
use crate::socket::{is_normal_close_code, SocketFrame, SocketSink, SocketStream};
use crate::subscription::Subscription;

/// How long the connection may go without hearing a pong.
const READ_TIMEOUT: Duration = Duration::from_secs(60);
/// WebSocket ping interval, 9/10 of the read timeout.
const WS_PING_PERIOD: Duration = Duration::from_secs(54);
/// Application-level cable ping interval.
const CABLE_PING_PERIOD: Duration = Duration::from_secs(3);
/// Deadline applied to every socket write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Capacity of the outbound queue shared by all subscriptions on a
/// connection; senders rendezvous with the send loop.
const OUTBOUND_QUEUE_CAPACITY: usize = 1;

/// Handles subscription and action commands on behalf of a connection.
#[async_trait]
pub trait CableHandler: Send {
    /// Accept or reject a new channel subscription; the handler may
    /// hold the [`Subscription`] to push data later. Returning an
    /// error rejects the subscription without ending the connection.
    async fn handle_subscription(
        &mut self,
        ctx: &CancellationToken,
        subscription: Subscription,
    ) -> Result<(), CableError>;

    /// Process an action command; any error ends the connection.
    async fn handle_action(
        &mut self,
        ctx: &CancellationToken,
        identifier: &str,
        data: &str,
    ) -> Result<(), CableError>;
}

/// A server-side cable connection over an upgraded WebSocket.
pub struct Connection<H> {
    handler: H,
    marshaler: Marshaler,
    sanitize: ErrorSanitizer,
}

impl<H: CableHandler> Connection<H> {
    /// Create a connection for the negotiated sub-protocol.
    pub fn new(subprotocol: &str, handler: H) -> Result<Self, CableError> {
        let marshaler = Marshaler::for_subprotocol(subprotocol)
            .ok_or_else(|| CableError::UnsupportedSubprotocol(subprotocol.to_string()))?;
        Ok(Self {
            handler,
            marshaler,
            sanitize: Arc::new(default_error_sanitizer),
        })
    }

    /// Replace the sanitizer applied to errors before they reach the
    /// client in disconnect messages.
    #[must_use]
    pub fn with_error_sanitizer(mut self, sanitize: ErrorSanitizer) -> Self {
        self.sanitize = sanitize;
        self
    }

    /// Run the connection until the peer disconnects, a protocol error
    /// occurs, or `ctx` is cancelled. Normal closes and cancellation
    /// return `Ok`; teardown always cancels every subscription, sends
    /// a best-effort disconnect message, and closes the socket.
    pub async fn serve<R, W>(
        self,
        ctx: &CancellationToken,
        reader: R,
        writer: W,
    ) -> Result<(), CableError>
    where
        R: SocketStream,
        W: SocketSink,
    {
        let (to_client, outbound) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let done = ctx.child_token();

        let mut receive = ReceiveHalf {
            reader,
            handler: self.handler,
            marshaler: self.marshaler,
            unsubscribers: HashMap::new(),
            to_client,
        };
        let mut send = SendHalf {
            writer,
            marshaler: self.marshaler,
            outbound,
        };

        // Either loop finishing cancels the other through the shared
        // token, then both results are collected.
        let (receive_result, send_result) = tokio::join!(
            async {
                let result = receive.run(&done).await;
                done.cancel();
                result
            },
            async {
                let result = send.run(&done).await;
                done.cancel();
                result
            },
        );

        // Teardown runs strictly after the receive loop has exited, so
        // the unsubscriber map has a single owner throughout.
        for (_, canceller) in receive.unsubscribers.drain() {
            canceller.cancel();
        }

        let failure = primary_error(receive_result.err(), send_result.err());
        debug!(error = ?failure, "connection ending");

        // Best-effort courtesy messages; the peer may already be gone.
        // A normal close carries no reason at all.
        let reason = (self.sanitize)(match &failure {
            Some(CableError::NormalClose) | None => None,
            Some(err) => Some(err),
        });
        let _ = send
            .write_marshaled(&Disconnect::new(reason, false))
            .await;
        let _ = send.writer.close().await;

        match failure {
            Some(err) if !err.is_shutdown() => Err(err),
            _ => Ok(()),
        }
    }
}

/// Prefer the first real fault; otherwise surface whichever shutdown
/// signal ended the loops.
fn primary_error(
    receive: Option<CableError>,
    send: Option<CableError>,
) -> Option<CableError> {
    match (receive, send) {
        (Some(r), Some(s)) => {
            if r.is_shutdown() && !s.is_shutdown() {
                Some(s)
            } else {
                Some(r)
            }
        }
        (Some(r), None) => Some(r),
        (None, Some(s)) => Some(s),
        (None, None) => None,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct ReceiveHalf<R, H> {
    reader: R,
    handler: H,
    marshaler: Marshaler,
    /// Identifier to cancel token for each live subscription. Owned by
    /// the receive loop alone; the close path reads it only after this
    /// loop has exited.
    unsubscribers: HashMap<String, CancellationToken>,
    to_client: mpsc::Sender<ServerMessage>,
}

impl<R: SocketStream, H: CableHandler> ReceiveHalf<R, H> {
    async fn run(&mut self, ctx: &CancellationToken) -> Result<(), CableError> {
        let mut deadline = Instant::now() + READ_TIMEOUT;
        loop {
            let frame = tokio::select! {
                () = ctx.cancelled() => return Err(CableError::Cancelled),
                () = time::sleep_until(deadline) => return Err(CableError::ReadTimeout),
                frame = self.reader.next_frame() => frame?,
            };
            if ctx.is_cancelled() {
                return Err(CableError::Cancelled);
            }

            let Some(frame) = frame else {
                return Err(CableError::NormalClose);
            };
            match frame {
                SocketFrame::Pong(_) => {
                    deadline = Instant::now() + READ_TIMEOUT;
                }
                SocketFrame::Ping(_) => {
                    // The socket layer answers pings itself.
                }
                SocketFrame::Close(code) => {
                    return Err(match code {
                        Some(code) if !is_normal_close_code(Some(code)) => {
                            CableError::Closed(code)
                        }
                        _ => CableError::NormalClose,
                    });
                }
                SocketFrame::Text(text) => {
                    if self.marshaler.is_binary() {
                        return Err(CableError::FrameType {
                            got: "text",
                            expected: "binary",
                        });
                    }
                    let command: ClientMessage = self.marshaler.unmarshal(text.as_bytes())?;
                    self.receive(ctx, command).await?;
                }
                SocketFrame::Binary(data) => {
                    if !self.marshaler.is_binary() {
                        return Err(CableError::FrameType {
                            got: "binary",
                            expected: "text",
                        });
                    }
                    let command: ClientMessage = self.marshaler.unmarshal(&data)?;
                    self.receive(ctx, command).await?;
                }
            }
        }
    }

    async fn receive(
        &mut self,
        ctx: &CancellationToken,
        command: ClientMessage,
    ) -> Result<(), CableError> {
        match command.command {
            Command::Subscribe => self.subscribe(ctx, command.identifier).await,
            Command::Unsubscribe => {
                if let Some(canceller) = self.unsubscribers.remove(&command.identifier) {
                    canceller.cancel();
                }
                Ok(())
            }
            Command::Action => {
                self.handler
                    .handle_action(ctx, &command.identifier, &command.data)
                    .await
            }
        }
    }

    async fn subscribe(
        &mut self,
        ctx: &CancellationToken,
        identifier: String,
    ) -> Result<(), CableError> {
        if self.unsubscribers.contains_key(&identifier) {
            // Already subscribed; just confirm it again.
            return self
                .enqueue(ctx, ServerMessage::confirmation(identifier))
                .await;
        }

        let canceller = ctx.child_token();
        let subscription = Subscription::new(identifier.clone(), self.to_client.clone());
        match self
            .handler
            .handle_subscription(&canceller, subscription)
            .await
        {
            Ok(()) => {
                self.unsubscribers.insert(identifier.clone(), canceller);
                self.enqueue(ctx, ServerMessage::confirmation(identifier))
                    .await
            }
            Err(err) => {
                warn!(%identifier, %err, "subscription rejected");
                canceller.cancel();
                self.enqueue(ctx, ServerMessage::rejection(identifier))
                    .await
            }
        }
    }

    async fn enqueue(
        &self,
        ctx: &CancellationToken,
        message: ServerMessage,
    ) -> Result<(), CableError> {
        tokio::select! {
            () = ctx.cancelled() => Err(CableError::Cancelled),
            sent = self.to_client.send(message) => sent.map_err(|_| CableError::Cancelled),
        }
    }
}

struct SendHalf<W> {
    writer: W,
    marshaler: Marshaler,
    outbound: mpsc::Receiver<ServerMessage>,
}

impl<W: SocketSink> SendHalf<W> {
    async fn run(&mut self, ctx: &CancellationToken) -> Result<(), CableError> {
        let mut socket_ping = time::interval_at(Instant::now() + WS_PING_PERIOD, WS_PING_PERIOD);
        let mut cable_ping =
            time::interval_at(Instant::now() + CABLE_PING_PERIOD, CABLE_PING_PERIOD);

        self.write_marshaled(&ServerMessage::welcome()).await?;

        loop {
            tokio::select! {
                () = ctx.cancelled() => return Err(CableError::Cancelled),
                _ = socket_ping.tick() => {
                    if ctx.is_cancelled() {
                        return Err(CableError::Cancelled);
                    }
                    self.write_frame(SocketFrame::Ping(unix_now().to_string().into_bytes()))
                        .await?;
                }
                _ = cable_ping.tick() => {
                    if ctx.is_cancelled() {
                        return Err(CableError::Cancelled);
                    }
                    self.write_marshaled(&ServerMessage::ping(unix_now())).await?;
                }
                message = self.outbound.recv() => {
                    if ctx.is_cancelled() {
                        return Err(CableError::Cancelled);
                    }
                    match message {
                        Some(message) => self.write_marshaled(&message).await?,
                        // All queue senders dropped; nothing left to send.
                        None => return Err(CableError::Cancelled),
                    }
                }
            }
        }
    }

    async fn write_marshaled<T: Serialize>(&mut self, value: &T) -> Result<(), CableError> {
        let marshaled = self.marshaler.marshal(value)?;
        let frame = if self.marshaler.is_binary() {
            SocketFrame::Binary(marshaled)
        } else {
            match String::from_utf8(marshaled) {
                Ok(text) => SocketFrame::Text(text),
                Err(_) => {
                    return Err(CableError::Other(
                        "marshaled text frame was not valid UTF-8".to_string(),
                    ))
                }
            }
        };
        self.write_frame(frame).await
    }

    async fn write_frame(&mut self, frame: SocketFrame) -> Result<(), CableError> {
        match time::timeout(WRITE_TIMEOUT, self.writer.send_frame(frame)).await {
            Ok(sent) => Ok(sent?),
            Err(_) => Err(CableError::WriteTimeout),
        }
    }
}
