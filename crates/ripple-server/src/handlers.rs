//! Connection handlers for the Ripple server.
//!
//! This module wires the cable engine to axum's WebSocket upgrade and
//! registers the demonstration streams served by the binary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ripple_cable::{
    Cancellers, ChannelDispatcher, Connection, IdentifierChecker, SocketError, SocketFrame,
    SocketSink, SocketStream,
};
use ripple_core::{empty_handler, handler, middleware, EventContext, EventError};
use ripple_protocol::{Signer, SignerConfig, SUBPROTOCOL_JSON, SUBPROTOCOL_MSGPACK};
use ripple_streams::{
    streams_channel_factory, Broker, Context, StreamAction, StreamHandler, StreamMessage,
    CHANNEL_NAME,
};

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};

/// Shared server state.
pub struct AppState {
    /// The stream broker.
    pub broker: Broker,
    /// Session ID to connection-cancellation registry, for tearing
    /// down every subscription of a session at once.
    pub cancellers: Arc<Cancellers>,
    /// Signer for stream subscription identifiers.
    pub signer: Arc<Signer>,
    /// Cancelled to shut every connection down.
    pub shutdown: CancellationToken,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let signer = Arc::new(Signer::new(SignerConfig::from_env()?));
    let broker = Broker::new();
    let shutdown = CancellationToken::new();

    instrument_broker(&broker);
    register_demo_streams(&broker);

    {
        let broker = broker.clone();
        let ctx = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(err) = broker.serve(ctx).await {
                if !err.is_cancellation() {
                    error!(%err, "stream broker stopped");
                }
            }
        });
    }

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let state = Arc::new(AppState {
        broker,
        cancellers: Arc::new(Cancellers::new()),
        signer,
        shutdown,
    });

    let app = Router::new()
        .route(&config.cable.path, get(cable_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Ripple server listening on {}", addr);
    info!("Cable endpoint: ws://{}{}", addr, config.cable.path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Count every dispatched stream event by method.
fn instrument_broker(broker: &Broker) {
    broker.use_middleware(middleware(|next| {
        handler(move |c: Arc<Context>| {
            let next = Arc::clone(&next);
            Box::pin(async move {
                metrics::record_stream_event(&c.method().to_string());
                next(c).await
            })
        })
    }));
}

/// Render published messages as JSON lines.
fn json_lines_renderer() -> StreamHandler {
    handler(|c: Arc<Context>| {
        Box::pin(async move {
            for message in c.published() {
                match serde_json::to_string(message) {
                    Ok(line) => {
                        c.write_rendered(&line);
                        c.write_rendered("\n");
                    }
                    Err(err) => return Err(EventError::handler(err)),
                }
            }
            Ok(())
        })
    })
}

/// The streams served by the demonstration binary: chat-style rooms
/// published by clients, and a clock stream driven by a managed
/// publisher that runs only while someone is subscribed.
fn register_demo_streams(broker: &Broker) {
    broker.on_sub("/rooms/:id", empty_handler());
    broker.on_unsub("/rooms/:id", empty_handler());
    broker.on_msg("/rooms/:id", json_lines_renderer());

    broker.on_sub("/clock", empty_handler());
    broker.on_unsub("/clock", empty_handler());
    broker.on_msg("/clock", json_lines_renderer());
    broker.on_pub(
        "/clock",
        handler(|c: Arc<Context>| {
            Box::pin(async move {
                let cancelled = c.cancellation().clone();
                loop {
                    tokio::select! {
                        () = cancelled.cancelled() => return Ok(()),
                        () = tokio::time::sleep(Duration::from_secs(1)) => {
                            let now = SystemTime::now()
                                .duration_since(UNIX_EPOCH)
                                .map(|d| d.as_secs())
                                .unwrap_or(0);
                            c.publish(vec![StreamMessage::new(StreamAction::Update, "clock")
                                .with_data(serde_json::json!({ "unix": now }))])
                                .await;
                        }
                    }
                }
            })
        }),
    );
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler for the cable endpoint.
async fn cable_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // The session would normally come from the authenticated HTTP
    // session; a query parameter stands in for it here.
    let session_id = params
        .get("session")
        .cloned()
        .unwrap_or_else(generated_session_id);

    ws.protocols([SUBPROTOCOL_JSON, SUBPROTOCOL_MSGPACK])
        .on_upgrade(move |socket| handle_cable(socket, state, session_id))
}

fn generated_session_id() -> String {
    format!(
        "anon_{:x}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    )
}

/// Handle an upgraded cable connection until it ends.
async fn handle_cable(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let subprotocol = socket
        .protocol()
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let checker: IdentifierChecker = {
        let signer = Arc::clone(&state.signer);
        Arc::new(move |identifier: &str| signer.check(identifier).map_err(Into::into))
    };
    let factories = HashMap::from([(
        CHANNEL_NAME.to_string(),
        streams_channel_factory(
            state.broker.clone(),
            session_id.clone(),
            vec![checker.clone()],
        ),
    )]);
    let dispatcher = ChannelDispatcher::new(factories, vec![checker]);

    let connection = match Connection::new(&subprotocol, dispatcher) {
        Ok(connection) => connection,
        Err(err) => {
            warn!(session = %session_id, %err, "rejecting cable connection");
            return;
        }
    };

    let ctx = state.shutdown.child_token();
    state.cancellers.add(&session_id, ctx.clone());

    debug!(session = %session_id, %subprotocol, "cable connected");
    let (sink, stream) = socket.split();
    match connection
        .serve(&ctx, AxumSocketReader(stream), AxumSocketWriter(sink))
        .await
    {
        Ok(()) => debug!(session = %session_id, "cable disconnected"),
        Err(err) => {
            metrics::record_connection_error();
            warn!(session = %session_id, %err, "cable connection failed");
        }
    }
}

/// Read half of an axum WebSocket, adapted to the cable engine.
struct AxumSocketReader(SplitStream<WebSocket>);

#[async_trait]
impl SocketStream for AxumSocketReader {
    async fn next_frame(&mut self) -> Result<Option<SocketFrame>, SocketError> {
        match self.0.next().await {
            None => Ok(None),
            Some(Ok(Message::Text(text))) => Ok(Some(SocketFrame::Text(text))),
            Some(Ok(Message::Binary(data))) => Ok(Some(SocketFrame::Binary(data))),
            Some(Ok(Message::Ping(data))) => Ok(Some(SocketFrame::Ping(data))),
            Some(Ok(Message::Pong(data))) => Ok(Some(SocketFrame::Pong(data))),
            Some(Ok(Message::Close(frame))) => {
                Ok(Some(SocketFrame::Close(frame.map(|f| f.code))))
            }
            Some(Err(err)) => Err(SocketError::Transport(err.into())),
        }
    }
}

/// Write half of an axum WebSocket, adapted to the cable engine.
struct AxumSocketWriter(SplitSink<WebSocket, Message>);

#[async_trait]
impl SocketSink for AxumSocketWriter {
    async fn send_frame(&mut self, frame: SocketFrame) -> Result<(), SocketError> {
        let message = match frame {
            SocketFrame::Text(text) => Message::Text(text),
            SocketFrame::Binary(data) => Message::Binary(data),
            SocketFrame::Ping(data) => Message::Ping(data),
            SocketFrame::Pong(data) => Message::Pong(data),
            SocketFrame::Close(code) => Message::Close(code.map(|code| CloseFrame {
                code,
                reason: "".into(),
            })),
        };
        self.0
            .send(message)
            .await
            .map_err(|err| SocketError::Transport(err.into()))
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        // Best effort; the peer may already be gone.
        let _ = self.0.close().await;
        Ok(())
    }
}
