//! Handshake client: the REST side of session establishment.
//!
//! `connect` resolves a destination into a channel id plus history,
//! `send_message` hands a message to the broker, and `disconnect` is the
//! best-effort teardown notification. All transport errors are mapped into
//! the [`SyncError`] taxonomy right here; callers never see reqwest errors.
//!
//! The controller talks to the [`ChatApi`] trait rather than the concrete
//! client so tests can substitute a scripted implementation.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, warn};

use parlor_protocol::{
    ConnectRequest, ConnectResponse, DestinationKind, Message, SendMessageRequest,
};

use crate::config::SyncConfig;
use crate::directory::Destination;
use crate::error::SyncError;

/// A resolved, non-empty user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub username: String,
}

impl UserIdentity {
    /// Build an identity, rejecting empty ids or usernames.
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> anyhow::Result<Self> {
        let user_id = user_id.into();
        let username = username.into();
        if user_id.trim().is_empty() || username.trim().is_empty() {
            anyhow::bail!("user identity must be resolved and non-empty");
        }
        Ok(Self { user_id, username })
    }
}

/// The resolved, active link between a user and a destination's channel.
#[derive(Debug, Clone)]
pub struct ChatBinding {
    pub destination_name: String,
    pub kind: DestinationKind,
    pub channel_id: String,
    pub user: UserIdentity,
}

/// What a successful handshake hands back.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// Channel id valid for an immediate join.
    pub channel_id: String,
    /// Broker-reported status string.
    pub status: String,
    /// History, ascending by timestamp.
    pub history: Vec<Message>,
}

/// The REST operations the controller depends on.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Resolve a destination into an active binding attempt. Idempotent at
    /// the protocol level; each call is an independent attempt.
    async fn connect(
        &self,
        destination: &Destination,
        user: &UserIdentity,
    ) -> Result<HandshakeOutcome, SyncError>;

    /// Hand a message to the broker. Delivery is confirmed only via the
    /// channel echo, never by this call.
    async fn send_message(&self, binding: &ChatBinding, body: &str) -> Result<(), SyncError>;

    /// Best-effort teardown notification; failures are logged, not raised.
    async fn disconnect(&self);
}

/// reqwest-backed [`ChatApi`] implementation.
pub struct HandshakeClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HandshakeClient {
    pub fn new(config: &SyncConfig) -> anyhow::Result<Self> {
        let timeout = config.handshake_timeout();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building handshake HTTP client")?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn connect_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::HandshakeTimeout(self.timeout)
        } else {
            SyncError::HandshakeFailed(err.to_string())
        }
    }
}

#[async_trait]
impl ChatApi for HandshakeClient {
    async fn connect(
        &self,
        destination: &Destination,
        user: &UserIdentity,
    ) -> Result<HandshakeOutcome, SyncError> {
        let request = ConnectRequest {
            name: destination.name.clone(),
            kind: destination.kind,
            id_user: user.user_id.clone(),
            username: user.username.clone(),
        };

        debug!("handshake for {} ({})", destination.name, destination.kind);

        let response = self
            .http
            .post(self.url("/connect"))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.connect_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::HandshakeFailed(format!("{status}: {body}")));
        }

        let body: ConnectResponse = response.json().await.map_err(|e| self.connect_error(e))?;

        debug!(
            "handshake for {} resolved channel {} with {} messages",
            destination.name,
            body.session.chat,
            body.messages.len()
        );

        Ok(HandshakeOutcome {
            channel_id: body.session.chat,
            status: body.status,
            history: body.messages,
        })
    }

    async fn send_message(&self, binding: &ChatBinding, body: &str) -> Result<(), SyncError> {
        let request = SendMessageRequest {
            name: binding.destination_name.clone(),
            message: body.to_string(),
            id_user: binding.user.user_id.clone(),
            username: binding.user.username.clone(),
            kind: binding.kind,
            chat: binding.channel_id.clone(),
        };

        let response = self
            .http
            .post(self.url("/send_message"))
            .json(&request)
            .send()
            .await
            .map_err(|e| SyncError::SendFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::SendFailed(format!("{status}: {text}")));
        }

        Ok(())
    }

    async fn disconnect(&self) {
        if let Err(err) = self.http.post(self.url("/disconnect")).send().await {
            warn!("disconnect notification failed: {err}");
        }
    }
}
