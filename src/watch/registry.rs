use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

use super::kinds_for;
use super::WatchKind;
use crate::errors::Error;
use crate::errors::Result;
use crate::events::Event;

type Slot = oneshot::Sender<Result<Event>>;

/// Tracks outstanding one-shot watch registrations keyed by path and kind.
///
/// Shared between the supervisor's receive path (which fires registrations)
/// and caller tasks (which install them); the map is concurrent and no entry
/// lock is ever held across I/O.
#[derive(Default)]
pub struct WatchRegistry {
    table: DashMap<(String, WatchKind), Vec<Slot>>,
}

impl WatchRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Install a pre-built registration slot. Called on the receive path
    /// after a successful watch-bearing read, before the result is released
    /// to the caller.
    pub(crate) fn install(
        &self,
        path: &str,
        kind: WatchKind,
        slot: Slot,
    ) {
        self.table
            .entry((path.to_string(), kind))
            .or_default()
            .push(slot);
        trace!(path, ?kind, "watch registered");
    }

    /// Install a registration and hand back its future in one step.
    #[allow(dead_code)]
    pub(crate) fn register(
        &self,
        path: &str,
        kind: WatchKind,
    ) -> WatchFuture {
        let (tx, rx) = oneshot::channel();
        self.install(path, kind, tx);
        WatchFuture { rx }
    }

    /// Resolve every registration the notification matches. Each fires with
    /// its own copy of `event` and is removed; at-most-once per
    /// registration.
    pub(crate) fn fire(
        &self,
        event: &Event,
    ) {
        let Some(notification) = event.notification else {
            return;
        };
        for kind in kinds_for(notification) {
            if let Some((_, slots)) = self.table.remove(&(event.path.clone(), *kind)) {
                debug!(
                    path = %event.path,
                    ?kind,
                    count = slots.len(),
                    "watch triggered"
                );
                for slot in slots {
                    let _ = slot.send(Ok(event.clone()));
                }
            }
        }
    }

    /// Drop every outstanding registration without firing, resolving their
    /// futures with `make_err`. Used on session expiry and on close.
    pub(crate) fn abort_all<F>(
        &self,
        make_err: F,
    ) where
        F: Fn() -> Error,
    {
        let keys: Vec<_> = self.table.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, slots)) = self.table.remove(&key) {
                for slot in slots {
                    let _ = slot.send(Err(make_err()));
                }
            }
        }
    }

    /// Outstanding registrations for one path and kind. Test and diagnostic
    /// use only.
    pub fn registration_count(
        &self,
        path: &str,
        kind: WatchKind,
    ) -> usize {
        self.table
            .get(&(path.to_string(), kind))
            .map(|slots| slots.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Resolves with the watch's trigger event, exactly once.
pub struct WatchFuture {
    rx: oneshot::Receiver<Result<Event>>,
}

impl WatchFuture {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Event>>) -> Self {
        Self { rx }
    }

    /// Wait for the trigger. Fails with [`Error::SessionExpired`] or
    /// [`Error::ConnectionClosed`] when the registration was dropped before
    /// firing.
    pub async fn wait(self) -> Result<Event> {
        match self.rx.await {
            Ok(outcome) => outcome,
            // Registry itself went away: the client was torn down.
            Err(_) => Err(Error::ConnectionClosed),
        }
    }
}
