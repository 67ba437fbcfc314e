//! In-process broker used by the integration tests.
//!
//! Implements the client-observable contract of the real backend: the REST
//! handshake and send endpoints plus the room channel with join/leave
//! fan-out. One instance per test, on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsFrame, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, post},
};
use chrono::Utc;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use parlor_protocol::{
    ChannelCommand, ChannelEvent, ConnectRequest, ConnectResponse, ConnectSession, DirectoryEntry,
    Message, SendMessageRequest,
};

/// A sender feeding one connected channel client, keyed for removal.
type RoomMember = (u64, mpsc::UnboundedSender<String>);

pub struct BrokerState {
    /// Destination name -> channel id.
    channels: DashMap<String, String>,

    /// Channel id -> connected members.
    rooms: DashMap<String, Vec<RoomMember>>,

    /// Channel id -> conversation history.
    history: DashMap<String, Vec<Message>>,

    next_message_id: AtomicI64,
    next_conn_id: AtomicU64,

    /// Artificial delay before answering /connect, for timeout tests.
    connect_delay: Option<Duration>,
}

impl BrokerState {
    fn stamp_message(&self, username: &str, body: &str) -> Message {
        Message {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            body: body.to_string(),
            sent_at: Utc::now(),
            sender_username: username.to_string(),
        }
    }

    fn broadcast(&self, channel_id: &str, event: &ChannelEvent) {
        let json = serde_json::to_string(event).expect("serializable event");
        if let Some(members) = self.rooms.get(channel_id) {
            for (_, tx) in members.iter() {
                let _ = tx.send(json.clone());
            }
        }
    }
}

/// Handle to a running broker.
pub struct Broker {
    addr: SocketAddr,
    state: Arc<BrokerState>,
}

impl Broker {
    /// Start a broker with the default two-destination directory:
    /// "Alice" (direct, channel `q1`) and "Devs" (topic, channel `t-devs`).
    pub async fn start() -> Self {
        Self::start_inner(None).await
    }

    /// Start a broker whose /connect answers only after `delay`.
    pub async fn start_with_connect_delay(delay: Duration) -> Self {
        Self::start_inner(Some(delay)).await
    }

    async fn start_inner(connect_delay: Option<Duration>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let state = Arc::new(BrokerState {
            channels: DashMap::new(),
            rooms: DashMap::new(),
            history: DashMap::new(),
            next_message_id: AtomicI64::new(1),
            next_conn_id: AtomicU64::new(1),
            connect_delay,
        });

        state.channels.insert("Alice".to_string(), "q1".to_string());
        state.channels.insert("Devs".to_string(), "t-devs".to_string());

        let router = Router::new()
            .route("/connect", post(handle_connect))
            .route("/send_message", post(handle_send))
            .route("/disconnect", post(handle_disconnect))
            .route("/ws", any(handle_upgrade))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// The directory snapshot matching this broker's destinations.
    pub fn directory(&self) -> Vec<DirectoryEntry> {
        vec![
            DirectoryEntry {
                name: "Alice".to_string(),
                last_message_preview: "see you".to_string(),
                url: Some("q1".to_string()),
            },
            DirectoryEntry {
                name: "Devs".to_string(),
                last_message_preview: String::new(),
                url: None,
            },
        ]
    }

    /// Record a message into a channel's history without broadcasting,
    /// simulating history accumulated before the client connected.
    pub fn seed_history(&self, channel_id: &str, username: &str, body: &str) -> Message {
        let message = self.state.stamp_message(username, body);
        self.state
            .history
            .entry(channel_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    /// Accept and fan out a message as if another participant had sent it.
    pub fn push(&self, channel_id: &str, username: &str, body: &str) -> Message {
        let message = self.state.stamp_message(username, body);
        self.state
            .history
            .entry(channel_id.to_string())
            .or_default()
            .push(message.clone());
        self.state
            .broadcast(channel_id, &ChannelEvent::NewMessage(message.clone()));
        message
    }

    /// Re-deliver an already delivered message, simulating at-least-once
    /// transport behavior.
    pub fn redeliver(&self, channel_id: &str, message: &Message) {
        self.state
            .broadcast(channel_id, &ChannelEvent::NewMessage(message.clone()));
    }

    /// Drop every member of a room, closing their sockets from the broker
    /// side.
    pub fn kill_room(&self, channel_id: &str) {
        self.state.rooms.remove(channel_id);
    }

    /// Number of live members in a room.
    pub fn members(&self, channel_id: &str) -> usize {
        self.state
            .rooms
            .get(channel_id)
            .map(|m| m.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

async fn handle_connect(
    State(state): State<Arc<BrokerState>>,
    Json(request): Json<ConnectRequest>,
) -> Response {
    if let Some(delay) = state.connect_delay {
        tokio::time::sleep(delay).await;
    }

    let Some(channel_id) = state.channels.get(&request.name).map(|c| c.value().clone()) else {
        return (StatusCode::NOT_FOUND, "unknown destination").into_response();
    };

    let messages = state
        .history
        .get(&channel_id)
        .map(|h| h.value().clone())
        .unwrap_or_default();

    Json(ConnectResponse {
        status: "success".to_string(),
        messages,
        session: ConnectSession { chat: channel_id },
    })
    .into_response()
}

async fn handle_send(
    State(state): State<Arc<BrokerState>>,
    Json(request): Json<SendMessageRequest>,
) -> Response {
    if !state.channels.iter().any(|c| *c.value() == request.chat) {
        return (StatusCode::NOT_FOUND, "unknown channel").into_response();
    }

    let message = state.stamp_message(&request.username, &request.message);
    state
        .history
        .entry(request.chat.clone())
        .or_default()
        .push(message.clone());
    state.broadcast(&request.chat, &ChannelEvent::NewMessage(message));

    StatusCode::OK.into_response()
}

async fn handle_disconnect() -> StatusCode {
    StatusCode::OK
}

async fn handle_upgrade(State(state): State<Arc<BrokerState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// One connected channel client: forward queued events out, track the rooms
/// it joins, and clean up when it goes away.
async fn handle_socket(state: Arc<BrokerState>, socket: WebSocket) {
    let conn_id = state.next_conn_id.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let send_task = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if sink.send(WsFrame::Text(json.into())).await.is_err() {
                return;
            }
        }
        // Queue dropped (room killed): close the socket from our side.
        let _ = sink.send(WsFrame::Close(None)).await;
    });

    let mut joined: Vec<String> = Vec::new();

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(WsFrame::Text(text)) => text.to_string(),
            Ok(WsFrame::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<ChannelCommand>(&text) {
            Ok(ChannelCommand::Join { room, .. }) => {
                state
                    .rooms
                    .entry(room.clone())
                    .or_default()
                    .push((conn_id, tx.clone()));
                joined.push(room);
            }
            Ok(ChannelCommand::Leave { room }) => {
                if let Some(mut members) = state.rooms.get_mut(&room) {
                    members.retain(|(id, _)| *id != conn_id);
                }
                joined.retain(|r| *r != room);
            }
            Err(_) => {}
        }
    }

    for room in joined {
        if let Some(mut members) = state.rooms.get_mut(&room) {
            members.retain(|(id, _)| *id != conn_id);
        }
    }
    send_task.abort();
}

/// How long the polling helpers below wait before giving up.
const POLL_DEADLINE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Wait until a room has exactly `expected` live members.
pub async fn wait_members(broker: &Broker, channel_id: &str, expected: usize) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < POLL_DEADLINE {
        if broker.members(channel_id) == expected {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!(
        "timed out waiting for {expected} members in {channel_id}, have {}",
        broker.members(channel_id)
    );
}

/// Wait until the controller's store holds exactly `expected` messages.
pub async fn wait_store_len(controller: &parlor::SessionController, expected: usize) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < POLL_DEADLINE {
        if controller.snapshot().await.messages.len() == expected {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!(
        "timed out waiting for {expected} stored messages, have {}",
        controller.snapshot().await.messages.len()
    );
}

/// Wait until some stored message satisfies the predicate.
pub async fn wait_message<F>(controller: &parlor::SessionController, what: &str, pred: F)
where
    F: Fn(&Message) -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < POLL_DEADLINE {
        if controller.snapshot().await.messages.iter().any(&pred) {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("timed out waiting for {what}");
}
