use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;
use tracing::warn;

use super::Event;

/// A registered diagnostic observer: a predicate plus a one-shot slot.
struct Observer {
    predicate: Box<dyn Fn(&Event) -> bool + Send + Sync>,
    slot: mpsc::Sender<Event>,
    triggered: bool,
}

/// Fan-out point for session and watch events.
///
/// The production path never blocks on a consumer: the application channel
/// is bounded and delivery drops (with a warning) when the application is
/// not draining it, and each observer slot holds exactly one event. The
/// observer list is guarded by its own lock, separate from anything the
/// supervisor holds while doing I/O.
pub struct EventDispatcher {
    main_tx: Mutex<Option<mpsc::Sender<Event>>>,
    observers: Mutex<Vec<Observer>>,
}

impl EventDispatcher {
    /// Create the dispatcher and the application-facing receiving half.
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (main_tx, main_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                main_tx: Mutex::new(Some(main_tx)),
                observers: Mutex::new(Vec::new()),
            },
            main_rx,
        )
    }

    /// Register a predicate-based observer. The returned [`EventWatcher`]
    /// resolves with the first subsequent event satisfying the predicate,
    /// exactly once; later matches are ignored.
    pub fn observe<F>(
        &self,
        predicate: F,
    ) -> EventWatcher
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let (slot_tx, slot_rx) = mpsc::channel(1);
        self.observers.lock().push(Observer {
            predicate: Box::new(predicate),
            slot: slot_tx,
            triggered: false,
        });
        EventWatcher { slot_rx }
    }

    /// Broadcast one event: every untriggered observer whose predicate
    /// matches gets its private copy, then the application channel gets the
    /// event regardless.
    pub(crate) fn publish(
        &self,
        event: Event,
    ) {
        {
            let mut observers = self.observers.lock();
            for observer in observers.iter_mut() {
                if !observer.triggered && (observer.predicate)(&event) {
                    observer.triggered = true;
                    // Capacity-1 slot, first send can only fail when the
                    // watcher side already went away.
                    let _ = observer.slot.try_send(event.clone());
                }
            }
            // Triggered observers and abandoned watchers are done for good.
            observers.retain(|o| !o.triggered && !o.slot.is_closed());
        }

        trace!(?event, "event published");
        let main_tx = self.main_tx.lock();
        if let Some(tx) = main_tx.as_ref() {
            if tx.try_send(event).is_err() {
                warn!("event channel full or gone, dropping event");
            }
        }
    }

    /// Close the application channel (end-of-stream for its consumer) and
    /// drop all observers. Idempotent.
    pub(crate) fn close(&self) {
        self.main_tx.lock().take();
        self.observers.lock().clear();
    }
}

/// Receiving half of a one-shot diagnostic observation.
pub struct EventWatcher {
    slot_rx: mpsc::Receiver<Event>,
}

impl EventWatcher {
    /// Wait up to `timeout` for the matched event. `None` on timeout or if
    /// the dispatcher closed before anything matched.
    pub async fn wait(
        mut self,
        timeout: Duration,
    ) -> Option<Event> {
        tokio::time::timeout(timeout, self.slot_rx.recv())
            .await
            .ok()
            .flatten()
    }
}
