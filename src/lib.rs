//! # keeper-client
//!
//! A session-oriented client for ZooKeeper-style coordination ensembles.
//!
//! The crate maintains one durable logical session against a multi-node
//! ensemble: it owns the TCP connection to one member at a time, negotiates
//! and re-negotiates the session, multiplexes concurrent requests over the
//! connection, detects disconnection, fails over to another member, and
//! publishes session-state and watch events to the application.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keeper_client::{Acl, ClientBuilder, CreateMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (client, mut events) = ClientBuilder::new(vec![
//!         "node1:2181".into(),
//!         "node2:2181".into(),
//!         "node3:2181".into(),
//!     ])
//!     .build()
//!     .await?;
//!
//!     // Lifecycle and watch events arrive on the channel.
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("event: {event:?}");
//!         }
//!     });
//!
//!     client
//!         .create("/app/config", "v1", CreateMode::Persistent, Acl::world_all())
//!         .await?;
//!     let (data, _stat) = client.get("/app/config").await?;
//!     assert_eq!(&data[..], b"v1");
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Model
//!
//! Losing the connected server is not an error the application sees on its
//! data calls beyond [`Error::ConnectionClosed`] for whatever was in flight:
//! the supervisor reconnects to another ensemble member and resumes the
//! *same* session, so the session id — and with it ephemeral nodes and
//! server-held watches — survives failover. Only an explicit
//! [`Client::close`] or a server-side session expiry ends the session.

mod builder;
mod client;
mod config;
mod constants;
mod errors;
mod events;
mod hosts;
pub mod proto;
mod session;
mod watch;

pub use builder::*;
pub use client::*;
pub use config::*;
pub use constants::PING_XID;
pub use constants::WATCH_XID;
pub use errors::*;
pub use events::Event;
pub use events::EventDispatcher;
pub use events::EventType;
pub use events::EventWatcher;
pub use events::State;
pub use proto::Acl;
pub use proto::CreateMode;
pub use proto::ErrorCode;
pub use proto::NotificationType;
pub use proto::Stat;
pub use session::SessionInfo;
pub use watch::WatchFuture;
pub use watch::WatchKind;
pub use watch::WatchRegistry;

//-----------------------------------------------------------
// Test utils
