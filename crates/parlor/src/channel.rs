//! Channel session: one persistent push transport per active binding.
//!
//! A thin state machine (`Closed -> Connecting -> Joined -> Closed`) around
//! a WebSocket connection. The session emits `join` on connect and `leave`
//! on close, dispatches inbound pushes to the registered handler, and
//! surfaces transport loss to the controller. It never reconnects on its
//! own; reconnection is a controller decision.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use parlor_protocol::{ChannelCommand, ChannelEvent, Message};

use crate::error::SyncError;

/// How long a joined transport gets to flush its `leave` frame on close.
const LEAVE_GRACE: Duration = Duration::from_secs(2);

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Channel connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Joined,
}

/// Handler invoked for each inbound push message. At most one handler is
/// active; registering a new one replaces the prior.
pub type MessageHandler = Box<dyn Fn(Message) + Send + Sync>;

/// Pushed to the controller when the transport drops out from under an open
/// channel.
#[derive(Debug)]
pub struct LostNotice {
    pub channel_id: String,
    pub error: SyncError,
}

/// One persistent channel connection.
pub struct ChannelSession {
    ws_url: String,
    state: Arc<Mutex<ChannelState>>,
    handler: Arc<Mutex<Option<MessageHandler>>>,
    lost_tx: mpsc::UnboundedSender<LostNotice>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ChannelCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    room: Mutex<Option<String>>,
}

impl ChannelSession {
    /// Create a closed session. Loss notices go to `lost_tx`.
    pub fn new(ws_url: String, lost_tx: mpsc::UnboundedSender<LostNotice>) -> Self {
        Self {
            ws_url,
            state: Arc::new(Mutex::new(ChannelState::Closed)),
            handler: Arc::new(Mutex::new(None)),
            lost_tx,
            outbound: Mutex::new(None),
            task: Mutex::new(None),
            room: Mutex::new(None),
        }
    }

    /// Register the push handler, replacing any prior one.
    pub async fn on_message(&self, handler: MessageHandler) {
        *self.handler.lock().await = Some(handler);
    }

    /// Current connection state.
    pub async fn state(&self) -> ChannelState {
        *self.state.lock().await
    }

    /// Open the channel: `Closed -> Connecting`, then `Joined` once the
    /// transport connects and the `join` control event is out. Fails with
    /// `AlreadyOpen` unless the session is `Closed`.
    pub async fn open(&self, channel_id: &str, username: &str) -> Result<(), SyncError> {
        {
            let mut state = self.state.lock().await;
            if *state != ChannelState::Closed {
                return Err(SyncError::AlreadyOpen);
            }
            *state = ChannelState::Connecting;
        }

        *self.room.lock().await = Some(channel_id.to_string());

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.outbound.lock().await = Some(cmd_tx);

        let task = tokio::spawn(run_channel(
            self.ws_url.clone(),
            channel_id.to_string(),
            username.to_string(),
            self.state.clone(),
            self.handler.clone(),
            self.lost_tx.clone(),
            cmd_rx,
        ));
        *self.task.lock().await = Some(task);

        Ok(())
    }

    /// Close the channel, emitting `leave` if it ever got off the ground.
    /// Always safe to call; a `Closed` session is a no-op.
    pub async fn close(&self) {
        let prev = {
            let mut state = self.state.lock().await;
            if *state == ChannelState::Closed {
                return;
            }
            let prev = *state;
            *state = ChannelState::Closed;
            prev
        };

        let room = self.room.lock().await.take();
        if let Some(tx) = self.outbound.lock().await.take()
            && let Some(room) = room
        {
            let _ = tx.send(ChannelCommand::Leave { room });
        }

        if let Some(mut task) = self.task.lock().await.take() {
            match prev {
                // Give a joined transport a moment to flush the leave frame.
                ChannelState::Joined => {
                    if timeout(LEAVE_GRACE, &mut task).await.is_err() {
                        task.abort();
                    }
                }
                // Still connecting: nothing to flush, drop the attempt.
                _ => task.abort(),
            }
        }
    }
}

/// Transport task: connect, join, then pump frames until leave or loss.
async fn run_channel(
    ws_url: String,
    room: String,
    username: String,
    state: Arc<Mutex<ChannelState>>,
    handler: Arc<Mutex<Option<MessageHandler>>>,
    lost_tx: mpsc::UnboundedSender<LostNotice>,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
) {
    let (ws, _) = match connect_async(&ws_url).await {
        Ok(conn) => conn,
        Err(err) => {
            close_with_loss(&state, &lost_tx, &room, format!("connect failed: {err}")).await;
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();

    let join = ChannelCommand::Join {
        room: room.clone(),
        username,
    };
    if let Err(err) = send_command(&mut sink, &join).await {
        close_with_loss(&state, &lost_tx, &room, format!("join failed: {err}")).await;
        return;
    }

    {
        let mut st = state.lock().await;
        // close() may have won the race while the transport was connecting.
        if *st == ChannelState::Closed {
            let _ = sink.send(WsMessage::Close(None)).await;
            return;
        }
        *st = ChannelState::Joined;
    }
    info!("joined channel {room}");

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(cmd @ ChannelCommand::Leave { .. }) => {
                    if let Err(err) = send_command(&mut sink, &cmd).await {
                        debug!("leave for {room} not delivered: {err}");
                    }
                    let _ = sink.send(WsMessage::Close(None)).await;
                    debug!("left channel {room}");
                    return;
                }
                Some(_) => {}
                None => {
                    // Session dropped without close(); release the transport.
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let text = text.to_string();
                    match serde_json::from_str::<ChannelEvent>(&text) {
                        Ok(ChannelEvent::NewMessage(message)) => {
                            if let Some(handler) = handler.lock().await.as_ref() {
                                handler(message);
                            } else {
                                debug!("push on {room} with no handler registered");
                            }
                        }
                        Err(err) => warn!("unparseable frame on {room}: {err}"),
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    close_with_loss(&state, &lost_tx, &room, "closed by remote".to_string()).await;
                    return;
                }
                // Ping/pong is answered by the transport layer.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    close_with_loss(&state, &lost_tx, &room, err.to_string()).await;
                    return;
                }
            },
        }
    }
}

async fn send_command(sink: &mut WsSink, cmd: &ChannelCommand) -> anyhow::Result<()> {
    let json = serde_json::to_string(cmd)?;
    sink.send(WsMessage::Text(json.into())).await?;
    Ok(())
}

/// Mark the session closed and, unless close() already owns the shutdown,
/// surface the loss to the controller.
async fn close_with_loss(
    state: &Arc<Mutex<ChannelState>>,
    lost_tx: &mpsc::UnboundedSender<LostNotice>,
    room: &str,
    reason: String,
) {
    let was_open = {
        let mut st = state.lock().await;
        let was_open = *st != ChannelState::Closed;
        *st = ChannelState::Closed;
        was_open
    };

    if was_open {
        warn!("channel {room} lost: {reason}");
        let _ = lost_tx.send(LostNotice {
            channel_id: room.to_string(),
            error: SyncError::ChannelLost(reason),
        });
    }
}
