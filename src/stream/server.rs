//! Real-time push server: one persistent WebSocket per client, with
//! first-message authentication, subscription management, broadcast
//! delivery, heartbeat liveness, and per-connection rate limiting.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use uuid::Uuid;

use super::connection::ConnectionState;
use super::protocol::{envelope, ClientMessage, ServerMessage};
use crate::config::StreamConfig;
use crate::logger::LogEntry;
use crate::manager::search::SearchQuery;
use crate::manager::LogManager;

/// getHistory's requested limit is clamped to this
const HISTORY_MAX_RESULTS: usize = 500;
const HISTORY_DEFAULT_RESULTS: usize = 100;

/// Outbound queue depth per connection
const SEND_QUEUE_SIZE: usize = 64;

/// Close codes
const CLOSE_AT_CAPACITY: u16 = 1013;
const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;
const CLOSE_SHUTDOWN: u16 = 1001;

#[derive(Clone)]
struct ConnectionHandle {
    tx: mpsc::Sender<Message>,
    state: Arc<RwLock<ConnectionState>>,
    closed: Arc<Notify>,
}

pub struct StreamServer {
    manager: Arc<LogManager>,
    config: StreamConfig,
    connections: DashMap<Uuid, ConnectionHandle>,
    shutdown_tx: broadcast::Sender<()>,
}

impl StreamServer {
    pub fn new(manager: Arc<LogManager>, config: StreamConfig) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(4);
        Arc::new(Self {
            manager,
            config,
            connections: DashMap::new(),
            shutdown_tx,
        })
    }

    /// Spawn the broadcast and heartbeat tasks.
    pub fn start(self: &Arc<Self>) {
        tokio::spawn(broadcast_task(self.clone()));
        tokio::spawn(heartbeat_task(self.clone()));
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/stream", get(ws_upgrade))
            .with_state(self)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn snapshot(&self) -> Vec<(Uuid, ConnectionHandle)> {
        self.connections
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Deliver one entry to every open connection that is
    /// authenticated, subscribed, and passing its filter. One
    /// connection's send failure is isolated.
    async fn broadcast_entry(&self, entry: Arc<LogEntry>) {
        let mut text: Option<String> = None;

        for (id, handle) in self.snapshot() {
            let wants = handle.state.read().await.wants(&entry);
            if !wants {
                continue;
            }

            let msg = text
                .get_or_insert_with(|| {
                    envelope(&ServerMessage::Entry {
                        subsystem: entry.subsystem.clone(),
                        entry: entry.clone(),
                    })
                })
                .clone();

            if handle.tx.try_send(Message::Text(msg)).is_err() {
                tracing::debug!(connection = %id, "Send queue full, entry dropped for connection");
            }
        }
    }

    /// Stop the heartbeat, notify and close every connection, then
    /// signal completion to the background tasks.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        let notice = envelope(&ServerMessage::Shutdown {
            message: "server shutting down".to_string(),
        });

        for (_, handle) in self.snapshot() {
            let _ = handle.tx.send(Message::Text(notice.clone())).await;
            let _ = handle
                .tx
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_SHUTDOWN,
                    reason: "server shutting down".into(),
                })))
                .await;
            handle.closed.notify_waiters();
        }

        self.connections.clear();
        tracing::info!("Stream server shut down");
    }
}

async fn ws_upgrade(
    State(server): State<Arc<StreamServer>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(server, socket))
}

async fn handle_socket(server: Arc<StreamServer>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    if server.connections.len() >= server.config.max_connections {
        tracing::warn!(
            cap = server.config.max_connections,
            "Rejecting connection: capacity reached"
        );
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_AT_CAPACITY,
                reason: "server at capacity".into(),
            })))
            .await;
        return;
    }

    let id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Message>(SEND_QUEUE_SIZE);
    let state = Arc::new(RwLock::new(ConnectionState::new(id)));
    let closed = Arc::new(Notify::new());

    server.connections.insert(
        id,
        ConnectionHandle {
            tx: tx.clone(),
            state: state.clone(),
            closed: closed.clone(),
        },
    );
    tracing::debug!(connection = %id, "Stream connection opened");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() || is_close {
                break;
            }
        }
    });

    let _ = tx
        .send(Message::Text(envelope(&ServerMessage::Welcome {
            connection_id: id.to_string(),
        })))
        .await;

    let mut shutdown_rx = server.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = closed.notified() => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let allowed = state
                        .write()
                        .await
                        .allow_message(server.config.max_messages_per_second);
                    if !allowed {
                        let _ = tx
                            .send(Message::Text(envelope(&ServerMessage::Error {
                                code: "rateLimited",
                                message: "message rate limit exceeded".to_string(),
                            })))
                            .await;
                        continue;
                    }

                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client_msg) => {
                            handle_client_message(&server, &tx, &state, client_msg).await;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Message::Text(envelope(&ServerMessage::Error {
                                    code: "invalidMessage",
                                    message: e.to_string(),
                                })))
                                .await;
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    state.write().await.last_pong = Instant::now();
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "Stream connection error");
                    break;
                }
            }
        }
    }

    server.connections.remove(&id);
    send_task.abort();
    tracing::debug!(connection = %id, "Stream connection closed");
}

async fn handle_client_message(
    server: &Arc<StreamServer>,
    tx: &mpsc::Sender<Message>,
    state: &Arc<RwLock<ConnectionState>>,
    msg: ClientMessage,
) {
    let reply = match msg {
        ClientMessage::Authenticate { api_key } => match server.manager.validate_key(&api_key).await {
            Ok(ctx) => {
                let mut s = state.write().await;
                s.authenticated = true;
                s.key_name = Some(ctx.name.clone());
                s.permissions = ctx.permissions.clone();
                drop(s);

                let mut permissions: Vec<_> = ctx.permissions.into_iter().collect();
                permissions.sort_by_key(|p| p.to_string());
                ServerMessage::Authenticated {
                    name: ctx.name,
                    permissions,
                    subsystems: server.manager.subsystem_names(),
                }
            }
            Err(e) => ServerMessage::Error {
                code: "authFailed",
                message: e.to_string(),
            },
        },

        ClientMessage::Subscribe { subsystems } => {
            if !state.read().await.authenticated {
                ServerMessage::Error {
                    code: "notAuthenticated",
                    message: "authenticate before subscribing".to_string(),
                }
            } else {
                // Unknown subsystem names are silently ignored
                let known: Vec<String> = subsystems
                    .into_iter()
                    .filter(|name| server.manager.logger(name).is_some())
                    .collect();

                let mut s = state.write().await;
                s.subscriptions.extend(known);
                ServerMessage::Subscribed {
                    subsystems: s.sorted_subscriptions(),
                }
            }
        }

        ClientMessage::Unsubscribe { subsystems } => {
            let mut s = state.write().await;
            s.subscriptions.retain(|name| !subsystems.contains(name));
            ServerMessage::Unsubscribed {
                subsystems: s.sorted_subscriptions(),
            }
        }

        ClientMessage::SetFilters { filters } => {
            state.write().await.filters = filters;
            ServerMessage::FiltersUpdated
        }

        ClientMessage::GetHistory {
            limit,
            start_date,
            end_date,
        } => {
            let s = state.read().await;
            if !s.authenticated {
                ServerMessage::Error {
                    code: "notAuthenticated",
                    message: "authenticate before requesting history".to_string(),
                }
            } else {
                let query = SearchQuery {
                    subsystems: s.sorted_subscriptions(),
                    text: s.filters.text.clone(),
                    status_codes: s.filters.status_codes.clone(),
                    methods: s.filters.methods.clone(),
                    client_ips: s.filters.client_ips.clone(),
                    start_date,
                    end_date,
                    limit: limit.unwrap_or(HISTORY_DEFAULT_RESULTS).min(HISTORY_MAX_RESULTS),
                    offset: 0,
                };
                drop(s);

                let found = server.manager.search_logs(&query).await;
                ServerMessage::History {
                    results: found.results,
                    total: found.total,
                }
            }
        }

        ClientMessage::Ping => ServerMessage::Pong,
    };

    let _ = tx.send(Message::Text(envelope(&reply))).await;
}

/// Forward every new entry event to matching connections.
async fn broadcast_task(server: Arc<StreamServer>) {
    let mut entries = server.manager.subscribe_entries();
    let mut shutdown_rx = server.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            result = entries.recv() => match result {
                Ok(entry) => server.broadcast_entry(entry).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Broadcast fell behind entry events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Ping every open connection on a fixed interval; close and remove
/// connections that have not acknowledged within twice the interval.
async fn heartbeat_task(server: Arc<StreamServer>) {
    let heartbeat = Duration::from_secs(server.config.heartbeat_interval_secs.max(1));
    let mut timer = tokio::time::interval(heartbeat);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut shutdown_rx = server.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = timer.tick() => {
                for (id, handle) in server.snapshot() {
                    let stale = handle.state.read().await.is_stale(heartbeat);
                    if stale {
                        tracing::info!(connection = %id, "Closing unresponsive connection");
                        let _ = handle.tx.try_send(Message::Close(Some(CloseFrame {
                            code: CLOSE_HEARTBEAT_TIMEOUT,
                            reason: "heartbeat timeout".into(),
                        })));
                        handle.closed.notify_waiters();
                        server.connections.remove(&id);
                    } else {
                        let _ = handle.tx.try_send(Message::Ping(Vec::new()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{RequestData, SubsystemConfig};
    use tempfile::TempDir;

    fn test_manager(tmp: &TempDir) -> Arc<LogManager> {
        LogManager::new(
            tmp.path().to_path_buf(),
            SubsystemConfig {
                flush_interval: Duration::from_secs(3600),
                compress: false,
                ..Default::default()
            },
            1000,
        )
    }

    fn entry(subsystem: &str, status: u16) -> Arc<LogEntry> {
        Arc::new(LogEntry::from_request(
            subsystem,
            RequestData {
                method: "GET".to_string(),
                url: "/x".to_string(),
                status_code: status,
                ..Default::default()
            },
        ))
    }

    /// Register a fake connection directly in the map and keep the
    /// receiving end of its send queue.
    fn attach_connection(server: &Arc<StreamServer>) -> (Uuid, Arc<RwLock<ConnectionState>>, mpsc::Receiver<Message>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SEND_QUEUE_SIZE);
        let state = Arc::new(RwLock::new(ConnectionState::new(id)));
        server.connections.insert(
            id,
            ConnectionHandle {
                tx,
                state: state.clone(),
                closed: Arc::new(Notify::new()),
            },
        );
        (id, state, rx)
    }

    #[tokio::test]
    async fn test_broadcast_delivers_only_to_subscribers() {
        let tmp = TempDir::new().unwrap();
        let server = StreamServer::new(test_manager(&tmp), StreamConfig::default());

        let (_, state, mut rx) = attach_connection(&server);
        {
            let mut s = state.write().await;
            s.authenticated = true;
            s.subscriptions.insert("cache".to_string());
        }

        server.broadcast_entry(entry("cache", 200)).await;
        let delivered = rx.try_recv().expect("subscribed entry delivered");
        match delivered {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["type"], "entry");
                assert_eq!(value["subsystem"], "cache");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // An entry for an unsubscribed subsystem is not delivered
        server.broadcast_entry(entry("proxy", 200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_skips_unauthenticated() {
        let tmp = TempDir::new().unwrap();
        let server = StreamServer::new(test_manager(&tmp), StreamConfig::default());

        let (_, state, mut rx) = attach_connection(&server);
        state.write().await.subscriptions.insert("cache".to_string());

        server.broadcast_entry(entry("cache", 200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_applies_filters() {
        let tmp = TempDir::new().unwrap();
        let server = StreamServer::new(test_manager(&tmp), StreamConfig::default());

        let (_, state, mut rx) = attach_connection(&server);
        {
            let mut s = state.write().await;
            s.authenticated = true;
            s.subscriptions.insert("cache".to_string());
            s.filters.status_codes = Some(vec![500]);
        }

        server.broadcast_entry(entry("cache", 200)).await;
        assert!(rx.try_recv().is_err());

        server.broadcast_entry(entry("cache", 500)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_one_full_queue_does_not_affect_others() {
        let tmp = TempDir::new().unwrap();
        let server = StreamServer::new(test_manager(&tmp), StreamConfig::default());

        let (_, full_state, _stalled_rx) = attach_connection(&server);
        let (_, ok_state, mut ok_rx) = attach_connection(&server);
        for state in [&full_state, &ok_state] {
            let mut s = state.write().await;
            s.authenticated = true;
            s.subscriptions.insert("cache".to_string());
        }

        // Saturate the first connection's queue while the healthy one
        // keeps draining
        let mut received = 0;
        for _ in 0..=SEND_QUEUE_SIZE {
            server.broadcast_entry(entry("cache", 200)).await;
            while ok_rx.try_recv().is_ok() {
                received += 1;
            }
        }
        assert_eq!(received, SEND_QUEUE_SIZE + 1);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_and_clears() {
        let tmp = TempDir::new().unwrap();
        let server = StreamServer::new(test_manager(&tmp), StreamConfig::default());

        let (_, _, mut rx) = attach_connection(&server);
        assert_eq!(server.connection_count(), 1);

        server.shutdown().await;
        assert_eq!(server.connection_count(), 0);

        let notice = rx.recv().await.expect("shutdown notice");
        match notice {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["type"], "shutdown");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(matches!(rx.recv().await, Some(Message::Close(_))));
    }
}
