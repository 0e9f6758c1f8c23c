//! Connection handlers for the Tandem server.
//!
//! Each WebSocket connection gets a session ID and an outbox. Inbound events
//! are decoded here and forwarded to the session manager; everything the
//! manager pushes into the outbox is written back to the socket.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use chrono::{SecondsFormat, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_core::{ManagerHandle, SessionId, SessionManager};
use tandem_protocol::{codec, ClientEvent, ServerEvent, PROTOCOL_VERSION};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How often lobby gauges are refreshed.
const GAUGE_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// Handle to the session manager.
    pub manager: ManagerHandle,
    /// Server configuration.
    pub config: Config,
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, manager: ManagerHandle) -> Self {
        Self {
            manager,
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// A reserved place under `limits.max_connections`, released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Encoding a client last used; replies follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Text,
    Binary,
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/users", get(users_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let (manager, _manager_task) =
        SessionManager::spawn(config.lobby_config(), config.matchmaking.command_buffer);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        tokio::spawn(metrics::run_lobby_gauges(manager.clone(), GAUGE_INTERVAL));
    }

    let state = Arc::new(AppState::new(config.clone(), manager));
    let app = app(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Tandem server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.manager.stats().await {
        Ok(stats) => Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "activeUsers": stats.video_chat_users,
            "browsingUsers": stats.browsing_users,
            "totalUsers": stats.total_users,
            "activeMatches": stats.active_matches,
            "waitingQueue": stats.waiting_queue,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }))
        .into_response(),
        Err(e) => unavailable(e),
    }
}

/// Lobby counters.
async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.manager.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => unavailable(e),
    }
}

/// Participants with a profile.
async fn users_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.manager.online_users().await {
        Ok(users) => Json(users).into_response(),
        Err(e) => unavailable(e),
    }
}

fn unavailable(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "Session manager unavailable");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "status": "unavailable" })),
    )
        .into_response()
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached, refusing upgrade"
        );
        metrics::record_rejected_connection();
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is at capacity").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let session = SessionId::generate();
    let (outbox, mut events) = mpsc::unbounded_channel();

    if let Err(e) = state.manager.connect(session.clone(), outbox).await {
        error!(session = %session, error = %e, "Failed to register connection");
        metrics::record_error("connect");
        return;
    }

    debug!(session = %session, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();
    let mut format = WireFormat::Text;

    let connected = ServerEvent::Connected {
        session_id: session.to_string(),
        version: PROTOCOL_VERSION,
        heartbeat: u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX),
    };
    if let Err(e) = send_event(&mut sender, &connected, format).await {
        error!(session = %session, error = %e, "Failed to send connected event");
        let _ = state.manager.disconnect(session).await;
        return;
    }

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Events pushed by the session manager
            Some(event) = events.recv() => {
                if let Err(e) = send_event(&mut sender, &event, format).await {
                    debug!(session = %session, error = %e, "Send failed");
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        format = WireFormat::Text;
                        metrics::record_message(text.len(), "inbound");

                        let open = match codec::decode::<ClientEvent>(&text) {
                            Ok(event) => forward(event, &session, &state).await,
                            Err(e) => reject(&mut sender, &session, e, format).await.is_ok(),
                        };
                        if !open {
                            break;
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        format = WireFormat::Binary;
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        let mut open = true;
                        while open {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(None) => break,
                                Ok(Some(event)) => open = forward(event, &session, &state).await,
                                Err(e) => {
                                    read_buffer.clear();
                                    open = reject(&mut sender, &session, e, format).await.is_ok();
                                    break;
                                }
                            }
                        }
                        if !open {
                            break;
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %session, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(session = %session, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: the manager cascades removal into queue, requests and matches
    if let Err(e) = state.manager.disconnect(session.clone()).await {
        warn!(session = %session, error = %e, "Disconnect not delivered");
    }

    debug!(session = %session, "WebSocket disconnected");
}

/// Forward an event to the session manager.
///
/// Returns `false` once the session manager is gone.
async fn forward(event: ClientEvent, session: &SessionId, state: &Arc<AppState>) -> bool {
    match state.manager.dispatch(session.clone(), event).await {
        Ok(()) => true,
        Err(e) => {
            error!(session = %session, error = %e, "Session manager unavailable");
            false
        }
    }
}

/// Answer a malformed message with an `error` event.
async fn reject(
    sender: &mut SplitSink<WebSocket, Message>,
    session: &SessionId,
    error: codec::ProtocolError,
    format: WireFormat,
) -> Result<()> {
    warn!(session = %session, error = %error, "Malformed event");
    metrics::record_error("decode");
    send_event(
        sender,
        &ServerEvent::error(format!("Invalid message: {}", error)),
        format,
    )
    .await
}

/// Send an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    format: WireFormat,
) -> Result<()> {
    let message = match format {
        WireFormat::Text => Message::Text(codec::encode(event)?),
        WireFormat::Binary => Message::Binary(codec::encode_binary(event)?.to_vec()),
    };
    let len = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_message(len, "outbound");
    sender.send(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
        let (manager, _task) = SessionManager::spawn(config.lobby_config(), 64);
        let state = Arc::new(AppState::new(config, manager));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let router = app(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, state)
    }

    async fn client(addr: SocketAddr) -> (Client, String) {
        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        let connected = next_event(&mut ws, "connected").await;
        let id = connected["data"]["sessionId"].as_str().unwrap().to_string();
        (ws, id)
    }

    async fn send(ws: &mut Client, event: Value) {
        ws.send(WsMessage::Text(event.to_string())).await.unwrap();
    }

    /// Next event with the given name, skipping others.
    async fn next_event(ws: &mut Client, name: &str) -> Value {
        serde_json::from_str(&next_text(ws, name).await).unwrap()
    }

    /// Raw text of the next event with the given name.
    async fn next_text(ws: &mut Client, name: &str) -> String {
        loop {
            let msg = ws.next().await.unwrap().unwrap();
            if let WsMessage::Text(text) = msg {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["event"] == name {
                    return text;
                }
            }
        }
    }

    fn join(name: &str) -> Value {
        json!({ "event": "join", "data": { "name": name, "age": 27, "gender": "Male" } })
    }

    #[tokio::test]
    async fn test_match_and_relay_offer() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let (mut a, a_id) = client(addr).await;
        let (mut b, b_id) = client(addr).await;
        assert_ne!(a_id, b_id);

        send(&mut a, join("Ann")).await;
        let waiting = next_event(&mut a, "waiting").await;
        assert_eq!(waiting["data"]["queuePosition"], 1);

        send(&mut b, join("Ben")).await;
        let a_matched = next_event(&mut a, "matched").await;
        let b_matched = next_event(&mut b, "matched").await;
        assert_eq!(a_matched["data"]["partner"]["name"], "Ben");
        assert_eq!(b_matched["data"]["partner"]["name"], "Ann");
        assert_ne!(
            a_matched["data"]["initiator"],
            b_matched["data"]["initiator"]
        );

        let (initiator, initiator_id, responder) = if a_matched["data"]["initiator"] == true {
            (&mut a, &a_id, &mut b)
        } else {
            (&mut b, &b_id, &mut a)
        };

        let offer = json!({ "type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1" });
        send(initiator, json!({ "event": "offer", "data": { "offer": offer } })).await;
        let relayed = next_event(responder, "offer").await;
        assert_eq!(relayed["data"]["offer"], offer);
        assert_eq!(relayed["data"]["from"], initiator_id.as_str());

        // Candidate text reaches the partner byte for byte.
        let candidate = r#"{"candidate":"candidate:1 1 UDP 2122252543 10.0.0.2 54321 typ host","sdpMLineIndex":0,"priority":1.10,"id":123456789012345678901234567890}"#;
        let frame = format!(r#"{{"event":"ice-candidate","data":{{"candidate":{}}}}}"#, candidate);
        initiator.send(WsMessage::Text(frame)).await.unwrap();
        let text = next_text(responder, "ice-candidate").await;
        assert!(text.contains(candidate), "candidate rewritten: {}", text);
    }

    #[tokio::test]
    async fn test_disconnect_notifies_partner() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let (mut a, _) = client(addr).await;
        let (mut b, _) = client(addr).await;

        send(&mut a, join("Ann")).await;
        next_event(&mut a, "waiting").await;
        send(&mut b, join("Ben")).await;
        next_event(&mut b, "matched").await;

        a.close(None).await.unwrap();
        next_event(&mut b, "partner-disconnected").await;
    }

    #[tokio::test]
    async fn test_invalid_join_gets_error() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let (mut a, _) = client(addr).await;

        send(&mut a, json!({ "event": "join", "data": { "name": "Ann" } })).await;
        let error = next_event(&mut a, "error").await;
        assert!(error["data"]["message"].as_str().unwrap().contains("age"));

        a.send(WsMessage::Text("not json".into())).await.unwrap();
        next_event(&mut a, "error").await;

        send(&mut a, json!({ "event": "ping", "data": { "timestamp": 42 } })).await;
        let pong = next_event(&mut a, "pong").await;
        assert_eq!(pong["data"]["timestamp"], 42);
    }

    #[tokio::test]
    async fn test_binary_ping_answered_in_binary() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let (mut a, _) = client(addr).await;

        let ping = codec::encode_binary(&ClientEvent::Ping { timestamp: Some(7) }).unwrap();
        a.send(WsMessage::Binary(ping.to_vec())).await.unwrap();

        loop {
            if let WsMessage::Binary(data) = a.next().await.unwrap().unwrap() {
                let event: ServerEvent = codec::decode_binary(&data).unwrap();
                assert_eq!(event, ServerEvent::Pong { timestamp: Some(7) });
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let mut config = Config::default();
        config.limits.max_connections = 1;
        let (addr, state) = spawn_server(config).await;

        let (_a, _) = client(addr).await;
        assert_eq!(state.connection_count(), 1);
        assert!(connect_async(format!("ws://{}/ws", addr)).await.is_err());
    }

    #[tokio::test]
    async fn test_health_and_users() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let (mut a, a_id) = client(addr).await;
        send(
            &mut a,
            json!({ "event": "register-presence", "data": { "name": "Ann" } }),
        )
        .await;
        // Round-trip a ping so the registration has been applied.
        send(&mut a, json!({ "event": "ping", "data": {} })).await;
        next_event(&mut a, "pong").await;

        let health = http_get(addr, "/health").await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["browsingUsers"], 1);
        let timestamp = health["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert!(timestamp.ends_with('Z'));

        let users = http_get(addr, "/api/users").await;
        assert_eq!(users[0]["id"], a_id.as_str());
        assert_eq!(users[0]["name"], "Ann");
        assert_eq!(users[0]["age"], 25);
        assert_eq!(users[0]["status"], "browsing");
    }

    async fn http_get(addr: SocketAddr, path: &str) -> Value {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            path, addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        serde_json::from_str(body).unwrap()
    }
}
