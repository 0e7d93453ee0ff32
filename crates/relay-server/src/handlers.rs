//! Connection handlers for the relay server.
//!
//! This module handles the WebSocket connection lifecycle: identity
//! resolution from the handshake, registration with the topic hub and
//! the relay core, and the per-connection event pump.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use relay_core::{AuthRequest, MemorySessionStore, Relay, SessionData};
use relay_protocol::{codec, ClientEvent, Response, ServerEvent, SessionInfo};
use relay_transport::TopicHub;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The lifecycle handler.
    pub relay: Relay,
    /// The topic hub connections register with.
    pub hub: Arc<TopicHub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Arc::new(TopicHub::with_capacity(config.limits.outbox_capacity));
        let store = Arc::new(MemorySessionStore::new());
        let relay = Relay::with_ack_timeout(
            hub.clone(),
            store,
            Duration::from_millis(config.broadcast.ack_timeout_ms),
        );

        Self { relay, hub, config }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.relay.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "users": stats.users,
        "connections": stats.connections,
        "conversations": stats.conversations,
    }))
}

/// Auth material supplied as query parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthQuery {
    session_id: Option<String>,
    user_id: Option<String>,
    username: Option<String>,
    client_id: Option<String>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Build the auth request from handshake headers and query parameters.
/// Headers win over query parameters.
fn auth_request(headers: &HeaderMap, query: AuthQuery) -> AuthRequest {
    AuthRequest {
        session_id: header(headers, "x-session-id").or(query.session_id),
        user_id: header(headers, "x-user-id").or(query.user_id),
        username: header(headers, "x-username").or(query.username),
        client_id: header(headers, "x-client-id").or(query.client_id),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let auth = auth_request(&headers, query);
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth))
}

/// Resolve the connection's identity, or produce the rejection event.
async fn resolve_session(
    state: &Arc<AppState>,
    auth: AuthRequest,
) -> Result<SessionData, ServerEvent> {
    match state.relay.authenticate(auth).await {
        Ok(session) => Ok(session),
        Err(e) => {
            warn!(error = %e, "Connection rejected");
            metrics::record_error("auth");
            Err(ServerEvent::Session(Response::error(
                e.status(),
                e.to_string(),
            )))
        }
    }
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, auth: AuthRequest) {
    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Resolve identity before anything is registered
    let session = match resolve_session(&state, auth).await {
        Ok(session) => session,
        Err(event) => {
            if let Ok(text) = codec::encode(&event) {
                let _ = sender.send(WsMessage::Text(text)).await;
            }
            return;
        }
    };

    // Connection metrics count established sessions only
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Register with the hub first so the private topic subscription in
    // connect() finds the outbox.
    let mut outbox = state.hub.register(&session.client_id);
    if let Err(e) = state.relay.connect(&session).await {
        error!(client = %session.client_id, error = %e, "Connection setup failed");
        state.hub.unregister(&session.client_id);
        return;
    }

    // Session-established acknowledgement
    let hello = ServerEvent::Session(Response::ok(SessionInfo {
        user_id: session.user_id.clone(),
        username: session.username.clone(),
        session_id: session.session_id.clone(),
    }));
    if send_event(&mut sender, &hello).await.is_err() {
        teardown(&state, &session).await;
        return;
    }

    // Event pump
    loop {
        tokio::select! {
            biased;

            // Deliveries addressed at this connection's topics
            Some(payload) = outbox.recv() => {
                metrics::record_message(payload.len(), "outbound");
                let text = String::from_utf8_lossy(&payload).into_owned();
                if sender.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(e) = handle_event(&text, &session, &state, &mut sender).await {
                            warn!(client = %session.client_id, error = %e, "Event handling error");
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_) | WsMessage::Binary(_))) => {
                        // Ignored; the protocol is text-only
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!(client = %session.client_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client = %session.client_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(client = %session.client_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    teardown(&state, &session).await;
}

/// Remove a connection's relay and hub state.
async fn teardown(state: &Arc<AppState>, session: &SessionData) {
    state.relay.disconnect(session).await;
    state.hub.unregister(&session.client_id);
    let stats = state.relay.stats();
    metrics::set_relay_stats(stats.users, stats.conversations);
}

/// Handle a decoded client event.
async fn handle_event(
    text: &str,
    session: &SessionData,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, WsMessage>,
) -> Result<()> {
    if text.len() > state.config.limits.max_event_size {
        warn!(client = %session.client_id, size = text.len(), "Oversized event dropped");
        metrics::record_error("oversized");
        return Ok(());
    }
    metrics::record_message(text.len(), "inbound");

    match codec::decode(text) {
        Ok(ClientEvent::Message(draft)) => {
            let response = state.relay.message(session, draft).await;
            if !response.is_success() {
                metrics::record_error("message");
            }
            send_event(sender, &ServerEvent::Message(response)).await?;
        }
        Ok(ClientEvent::Conversation(action)) => {
            debug!(
                client = %session.client_id,
                conversation = %action.conversation,
                action = ?action.action,
                "Conversation action"
            );
            let response = state.relay.conversation(session, &action).await;
            if !response.is_success() {
                metrics::record_error("conversation");
            }
            send_event(sender, &ServerEvent::Conversation(response)).await?;

            let stats = state.relay.stats();
            metrics::set_relay_stats(stats.users, stats.conversations);
        }
        Err(e) => {
            warn!(client = %session.client_id, error = %e, "Undecodable event");
            metrics::record_error("decode");
        }
    }

    Ok(())
}

/// Send a server event over the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    event: &ServerEvent,
) -> Result<()> {
    let text = codec::encode(event)?;
    metrics::record_message(text.len(), "outbound");
    sender.send(WsMessage::Text(text)).await?;
    Ok(())
}
