//! Client configuration.
//!
//! Defaults are overridable from a TOML file and from `PARLOR_`-prefixed
//! environment variables, in that order.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Default bound on the handshake round-trip.
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Endpoints and limits for the synchronization client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the REST API (handshake, send, disconnect).
    pub api_url: String,

    /// URL of the persistent channel endpoint.
    pub channel_url: String,

    /// Handshake timeout in seconds.
    pub handshake_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000".to_string(),
            channel_url: "ws://localhost:5000/ws".to_string(),
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl SyncConfig {
    /// Load configuration: defaults, then the optional TOML file, then
    /// `PARLOR_*` environment variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&Self::default()).context("serializing default configuration")?,
        );

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let settings = builder
            .add_source(Environment::with_prefix("PARLOR"))
            .build()
            .context("loading configuration")?;

        settings
            .try_deserialize()
            .context("deserializing configuration")
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}
