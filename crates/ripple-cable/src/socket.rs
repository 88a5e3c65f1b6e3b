//! Socket abstraction over WebSocket implementations.
//!
//! The connection engine is written against these traits so it can run
//! on any WebSocket stack; an adapter for tokio-tungstenite ships here
//! and servers embedding other stacks (such as axum's upgrade type)
//! implement the same two traits.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use crate::error::BoxError;

/// Close code for an ordinary close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for a peer going away (tab closed, navigation).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Whether a close code (or its absence) indicates an ordinary close.
#[must_use]
pub fn is_normal_close_code(code: Option<u16>) -> bool {
    matches!(code, None | Some(CLOSE_NORMAL) | Some(CLOSE_GOING_AWAY))
}

/// A WebSocket frame as seen by the connection engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<u16>),
}

/// Transport failures below the cable protocol.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("websocket transport failed: {0}")]
    Transport(#[source] BoxError),
}

/// The read half of a socket.
#[async_trait]
pub trait SocketStream: Send {
    /// The next frame, or `None` when the peer ended the stream
    /// cleanly.
    async fn next_frame(&mut self) -> Result<Option<SocketFrame>, SocketError>;
}

/// The write half of a socket.
#[async_trait]
pub trait SocketSink: Send {
    async fn send_frame(&mut self, frame: SocketFrame) -> Result<(), SocketError>;

    /// Close the socket; idempotent and safe after peer close.
    async fn close(&mut self) -> Result<(), SocketError>;
}

/// Split a tokio-tungstenite WebSocket into engine-facing halves.
pub fn split_websocket<S>(socket: WebSocketStream<S>) -> (WebSocketReader<S>, WebSocketWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (sink, stream) = socket.split();
    (WebSocketReader(stream), WebSocketWriter(sink))
}

/// Read half of a tokio-tungstenite WebSocket.
pub struct WebSocketReader<S>(SplitStream<WebSocketStream<S>>);

#[async_trait]
impl<S> SocketStream for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_frame(&mut self) -> Result<Option<SocketFrame>, SocketError> {
        loop {
            return match self.0.next().await {
                None => Ok(None),
                Some(Ok(Message::Text(text))) => Ok(Some(SocketFrame::Text(text))),
                Some(Ok(Message::Binary(data))) => Ok(Some(SocketFrame::Binary(data))),
                Some(Ok(Message::Ping(data))) => Ok(Some(SocketFrame::Ping(data))),
                Some(Ok(Message::Pong(data))) => Ok(Some(SocketFrame::Pong(data))),
                Some(Ok(Message::Close(frame))) => {
                    Ok(Some(SocketFrame::Close(frame.map(|f| f.code.into()))))
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => Ok(None),
                Some(Err(err)) => Err(SocketError::Transport(err.into())),
            };
        }
    }
}

/// Write half of a tokio-tungstenite WebSocket.
pub struct WebSocketWriter<S>(SplitSink<WebSocketStream<S>, Message>);

#[async_trait]
impl<S> SocketSink for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_frame(&mut self, frame: SocketFrame) -> Result<(), SocketError> {
        let message = match frame {
            SocketFrame::Text(text) => Message::Text(text),
            SocketFrame::Binary(data) => Message::Binary(data),
            SocketFrame::Ping(data) => Message::Ping(data),
            SocketFrame::Pong(data) => Message::Pong(data),
            SocketFrame::Close(code) => Message::Close(code.map(|code| CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            })),
        };
        self.0
            .send(message)
            .await
            .map_err(|err| SocketError::Transport(err.into()))
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        match self.0.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(SocketError::Transport(err.into())),
        }
    }
}
