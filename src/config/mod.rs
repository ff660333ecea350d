//! Client configuration.
//!
//! All tunables are explicit values handed to the builder; the crate keeps no
//! process-wide defaults or ambient global state, so multiple client
//! instances with different settings coexist in one process. Values load
//! from (lowest to highest priority):
//! 1. Hardcoded defaults
//! 2. An optional TOML file
//! 3. Environment variables (`KEEPER_*`)

mod retry;


pub use retry::*;

use std::time::Duration;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// Session timeout requested at the handshake (unit: milliseconds).
    /// The server may negotiate it down; the negotiated value governs
    /// keep-alive pacing.
    pub session_timeout_ms: u64,

    /// TCP dial plus handshake budget per candidate server (unit:
    /// milliseconds). A candidate that misses it is skipped, not retried.
    pub connect_timeout_ms: u64,

    /// Default deadline applied to each data operation (unit: milliseconds).
    pub request_timeout_ms: u64,

    /// Shuffle the ensemble address list once at construction. The shuffled
    /// order is then fixed for the lifetime of the client.
    pub shuffle_hosts: bool,

    /// Buffer of the session/watch event channel handed to the application.
    pub event_channel_capacity: usize,

    /// Backoff between reconnection cycles.
    pub reconnect: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 10_000,
            connect_timeout_ms: 1_000,
            request_timeout_ms: 3_000,
            shuffle_hosts: true,
            event_channel_capacity: 8,
            reconnect: BackoffPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from an optional TOML file with `KEEPER_*`
    /// environment variables layered on top.
    ///
    /// `KEEPER_SESSION_TIMEOUT_MS=30000` overrides `session_timeout_ms`;
    /// nested fields use a double underscore
    /// (`KEEPER_RECONNECT__MAX_DELAY_MS=5000`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let loaded = builder
            .add_source(Environment::with_prefix("KEEPER").separator("__"))
            .build()?;
        Ok(loaded.try_deserialize()?)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
