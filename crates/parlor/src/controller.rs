//! Session controller: the state machine that owns the conversation.
//!
//! Phases cycle `Idle -> Connecting -> Active -> Closing -> Idle`, with
//! `Failed` absorbing handshake and channel errors until the user selects a
//! destination again. The controller is the only writer of conversation
//! state; channel pushes and loss notices are funneled through a single
//! event queue, so the state machine is never re-entered concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc};

use parlor_protocol::Message;

use crate::channel::{ChannelSession, LostNotice};
use crate::config::SyncConfig;
use crate::directory::Directory;
use crate::error::SyncError;
use crate::handshake::{ChatApi, ChatBinding, HandshakeClient, UserIdentity};
use crate::store::MessageStore;

/// Controller phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Active,
    Closing,
    Failed,
}

/// Notices surfaced to the UI collaborator.
#[derive(Debug)]
pub enum SessionNotice {
    /// The channel dropped while active. History stays visible; selecting
    /// the destination again re-handshakes.
    ChannelLost {
        destination: String,
        error: SyncError,
    },
}

/// Read-only view of the conversation for rendering layers.
#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub phase: Phase,
    pub destination: Option<String>,
    pub messages: Vec<Message>,
}

/// Events funneled into the single state-mutation queue.
enum ControllerEvent {
    Push { channel_id: String, message: Message },
    Lost(LostNotice),
}

/// The conversation state, owned exclusively by the controller behind one
/// coarse mutex.
struct Conversation {
    phase: Phase,
    binding: Option<ChatBinding>,
    store: MessageStore,
    channel: Option<Arc<ChannelSession>>,
}

/// Orchestrates handshake, channel and store in response to user intent.
pub struct SessionController {
    api: Arc<dyn ChatApi>,
    directory: Directory,
    user: UserIdentity,
    channel_url: String,
    conversation: Arc<Mutex<Conversation>>,

    /// Stamp of the latest handshake attempt. A completion whose stamp is
    /// no longer current is discarded, so a slow early connect can never
    /// reactivate a binding the user has navigated away from.
    attempt: AtomicU64,

    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    lost_tx: mpsc::UnboundedSender<LostNotice>,
}

impl SessionController {
    /// Build a controller backed by the HTTP handshake client. Returns the
    /// controller and the notice stream for the UI collaborator.
    pub fn new(
        config: &SyncConfig,
        directory: Directory,
        user: UserIdentity,
    ) -> anyhow::Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionNotice>)> {
        let api = Arc::new(HandshakeClient::new(config)?);
        Ok(Self::with_api(
            api,
            config.channel_url.clone(),
            directory,
            user,
        ))
    }

    /// Build a controller over any [`ChatApi`] implementation.
    pub fn with_api(
        api: Arc<dyn ChatApi>,
        channel_url: String,
        directory: Directory,
        user: UserIdentity,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionNotice>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();

        let conversation = Arc::new(Mutex::new(Conversation {
            phase: Phase::Idle,
            binding: None,
            store: MessageStore::new(),
            channel: None,
        }));

        // Loss notices join the same queue as pushes.
        let lost_events_tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(notice) = lost_rx.recv().await {
                if lost_events_tx.send(ControllerEvent::Lost(notice)).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(pump_events(conversation.clone(), events_rx, notices_tx));

        let controller = Arc::new(Self {
            api,
            directory,
            user,
            channel_url,
            conversation,
            attempt: AtomicU64::new(0),
            events_tx,
            lost_tx,
        });

        (controller, notices_rx)
    }

    /// Bind to a destination. Valid from any phase; an existing binding is
    /// torn down first, so no overlap between old and new is observable.
    pub async fn select_destination(&self, name: &str) -> Result<(), SyncError> {
        let seq = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;

        self.teardown_to(Phase::Connecting).await;

        let destination = match self.directory.find(name) {
            Some(destination) => destination.clone(),
            None => {
                self.fail_if_current(seq).await;
                return Err(SyncError::HandshakeFailed(format!(
                    "unknown destination: {name}"
                )));
            }
        };

        info!("selecting {} ({})", destination.name, destination.kind);

        let outcome = self.api.connect(&destination, &self.user).await;

        let mut conv = self.conversation.lock().await;
        if self.attempt.load(Ordering::SeqCst) != seq {
            debug!("discarding superseded handshake for {}", destination.name);
            return Err(SyncError::Superseded);
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("handshake for {} failed: {err}", destination.name);
                conv.phase = Phase::Failed;
                return Err(err);
            }
        };

        if let Err(err) = conv.store.seed(outcome.history) {
            conv.phase = Phase::Failed;
            return Err(err);
        }

        let channel = Arc::new(ChannelSession::new(
            self.channel_url.clone(),
            self.lost_tx.clone(),
        ));

        let events_tx = self.events_tx.clone();
        let channel_id = outcome.channel_id.clone();
        channel
            .on_message(Box::new(move |message| {
                let _ = events_tx.send(ControllerEvent::Push {
                    channel_id: channel_id.clone(),
                    message,
                });
            }))
            .await;

        if let Err(err) = channel.open(&outcome.channel_id, &self.user.username).await {
            conv.store.clear();
            conv.phase = Phase::Failed;
            return Err(err);
        }

        conv.store.mark_live();
        conv.binding = Some(ChatBinding {
            destination_name: destination.name.clone(),
            kind: destination.kind,
            channel_id: outcome.channel_id.clone(),
            user: self.user.clone(),
        });
        conv.channel = Some(channel);
        conv.phase = Phase::Active;

        info!(
            "active on {} via channel {}",
            destination.name, outcome.channel_id
        );
        Ok(())
    }

    /// Send a message to the active destination. The message is not
    /// appended locally; it becomes visible only once it round-trips
    /// through the channel, so the store reflects actual delivery order.
    pub async fn send_message(&self, body: &str) -> Result<(), SyncError> {
        let binding = {
            let conv = self.conversation.lock().await;
            if conv.phase != Phase::Active {
                return Err(SyncError::NotConnected);
            }
            conv.binding.clone().ok_or(SyncError::NotConnected)?
        };

        self.api.send_message(&binding, body).await
    }

    /// Tear down the active binding: navigation away or sign-out.
    pub async fn teardown(&self) {
        // A handshake still in flight must not reactivate a binding we are
        // dropping.
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.teardown_to(Phase::Idle).await;
    }

    /// Read-only snapshot for rendering layers.
    pub async fn snapshot(&self) -> ConversationSnapshot {
        let conv = self.conversation.lock().await;
        ConversationSnapshot {
            phase: conv.phase,
            destination: conv.binding.as_ref().map(|b| b.destination_name.clone()),
            messages: conv.store.messages().to_vec(),
        }
    }

    /// Close channel, clear store and binding, land in `next`. The channel
    /// goes first; a binding must never outlive its channel.
    async fn teardown_to(&self, next: Phase) {
        let (channel, had_binding) = {
            let mut conv = self.conversation.lock().await;
            conv.phase = Phase::Closing;
            conv.store.mark_idle();
            (conv.channel.take(), conv.binding.take().is_some())
        };

        if let Some(channel) = channel {
            channel.close().await;
        }
        if had_binding {
            self.api.disconnect().await;
        }

        let mut conv = self.conversation.lock().await;
        conv.store.clear();
        conv.phase = next;
    }

    async fn fail_if_current(&self, seq: u64) {
        let mut conv = self.conversation.lock().await;
        if self.attempt.load(Ordering::SeqCst) == seq {
            conv.phase = Phase::Failed;
        }
    }
}

/// Apply channel events one at a time: the single funnel that keeps the
/// state machine from being re-entered concurrently.
async fn pump_events(
    conversation: Arc<Mutex<Conversation>>,
    mut events: mpsc::UnboundedReceiver<ControllerEvent>,
    notices: mpsc::UnboundedSender<SessionNotice>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ControllerEvent::Push {
                channel_id,
                message,
            } => {
                let mut conv = conversation.lock().await;
                let current = conv
                    .binding
                    .as_ref()
                    .is_some_and(|b| b.channel_id == channel_id);
                if current {
                    conv.store.append(message);
                } else {
                    debug!("discarding push for stale channel {channel_id}");
                }
            }
            ControllerEvent::Lost(notice) => {
                let mut conv = conversation.lock().await;
                let current = conv.phase == Phase::Active
                    && conv
                        .binding
                        .as_ref()
                        .is_some_and(|b| b.channel_id == notice.channel_id);
                if !current {
                    debug!("ignoring loss of stale channel {}", notice.channel_id);
                    continue;
                }

                warn!(
                    "channel {} lost while active: {}",
                    notice.channel_id, notice.error
                );

                let destination = conv
                    .binding
                    .take()
                    .map(|b| b.destination_name)
                    .unwrap_or_default();
                conv.channel = None; // the transport already closed itself
                conv.store.mark_idle(); // history stays visible
                conv.phase = Phase::Failed;

                let _ = notices.send(SessionNotice::ChannelLost {
                    destination,
                    error: notice.error,
                });
            }
        }
    }
}
