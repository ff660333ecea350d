//! Session ownership: the connection supervisor, the request multiplexer and
//! the state shared between them and the public client handle.
//!
//! The supervisor task exclusively owns the socket and the session secrets
//! (id, password). Everything the rest of the crate needs is reachable
//! through [`SessionHandle`]: the multiplexer for submitting requests, the
//! watch registry, the event dispatcher, a read-only session snapshot and
//! the cancellation token that ends it all.

mod multiplexer;
mod supervisor;


pub(crate) use multiplexer::Multiplexer;
pub(crate) use multiplexer::WatchInstall;
pub(crate) use supervisor::Supervisor;

use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::events::EventDispatcher;
use crate::watch::WatchRegistry;

/// Read-only session facts for diagnostics. Consumers treat session id
/// equality across a reconnection as the signal that resumption succeeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionInfo {
    pub id: i64,
    pub timeout_ms: i32,
}

/// State shared by the supervisor task, the request path and the client
/// handle.
pub(crate) struct SessionHandle {
    pub(crate) mux: Multiplexer,
    pub(crate) registry: WatchRegistry,
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) info: ArcSwap<SessionInfo>,
    pub(crate) cancel: CancellationToken,
}

impl SessionHandle {
    pub(crate) fn new(dispatcher: EventDispatcher) -> Arc<Self> {
        Arc::new(Self {
            mux: Multiplexer::new(),
            registry: WatchRegistry::new(),
            dispatcher,
            info: ArcSwap::from_pointee(SessionInfo::default()),
            cancel: CancellationToken::new(),
        })
    }
}
