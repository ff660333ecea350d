//! Configurable builder for [`Client`] instances.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::errors::Error;
use crate::errors::Result;
use crate::events::Event;
use crate::events::EventDispatcher;
use crate::events::EventType;
use crate::events::State;
use crate::session::SessionHandle;
use crate::session::Supervisor;

/// Builder for a client session.
///
/// # Typical Usage Flow
/// 1. Create with `ClientBuilder::new()`
/// 2. Chain configuration methods
/// 3. Finalize with `.build().await`
///
/// `build` spawns the connection supervisor and returns immediately with the
/// client handle and its event channel; use
/// [`connect_deadline`](ClientBuilder::connect_deadline) to instead fail
/// `build` when no session comes up in time.
pub struct ClientBuilder {
    servers: Vec<String>,
    config: ClientConfig,
    connect_deadline: Option<Duration>,
}

impl ClientBuilder {
    /// Create a new builder with default config and the given ensemble
    /// addresses (`host:port`).
    ///
    /// # Panics
    /// Panics if no address is provided.
    pub fn new(servers: Vec<String>) -> Self {
        assert!(!servers.is_empty(), "at least one server address required");
        Self {
            servers,
            config: ClientConfig::default(),
            connect_deadline: None,
        }
    }

    /// Session timeout requested at the handshake (default: 10s). The
    /// server may negotiate it down.
    pub fn session_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.session_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Dial-plus-handshake budget per candidate server (default: 1s).
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Default deadline for each data operation (default: 3s).
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Shuffle the address list once at construction (default: enabled).
    /// Disable for deterministic candidate order in tests.
    pub fn shuffle_hosts(
        mut self,
        shuffle: bool,
    ) -> Self {
        self.config.shuffle_hosts = shuffle;
        self
    }

    /// Overall budget for the *first* session establishment. When set,
    /// `build` fails with [`Error::Timeout`] if no session comes up in
    /// time, and the client is torn down rather than left retrying.
    pub fn connect_deadline(
        mut self,
        deadline: Duration,
    ) -> Self {
        self.connect_deadline = Some(deadline);
        self
    }

    /// Completely replaces the accumulated configuration, e.g. with one
    /// loaded through [`ClientConfig::load`].
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Spawn the connection supervisor and hand back the client plus the
    /// channel carrying every session and watch event until close.
    pub async fn build(self) -> Result<(Client, mpsc::Receiver<Event>)> {
        let (dispatcher, events_rx) = EventDispatcher::new(self.config.event_channel_capacity);
        let handle = SessionHandle::new(dispatcher);

        let first_session = self.connect_deadline.map(|_| {
            handle
                .dispatcher
                .observe(|e| e.kind == EventType::Session && e.state == State::HasSession)
        });

        info!(servers = ?self.servers, "starting ensemble client");
        let supervisor = Supervisor::new(self.servers, self.config.clone(), handle.clone());
        tokio::spawn(supervisor.run());

        let client = Client {
            handle,
            config: self.config,
        };

        if let (Some(deadline), Some(watcher)) = (self.connect_deadline, first_session) {
            if watcher.wait(deadline).await.is_none() {
                client.close();
                return Err(Error::Timeout);
            }
        }

        Ok((client, events_rx))
    }
}
