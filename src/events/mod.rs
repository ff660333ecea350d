//! Session lifecycle and watch events.
//!
//! A single producer (the connection supervisor, with the watch registry
//! feeding through it) broadcasts [`Event`]s to the application's event
//! channel and to any number of predicate-based diagnostic observers.
//! Delivery is broadcast, not queue-consuming: every observer sees every
//! event, and the application channel receives it regardless of how many
//! observers matched.

mod dispatcher;


pub use dispatcher::EventDispatcher;
pub use dispatcher::EventWatcher;

use crate::proto::ErrorCode;
use crate::proto::NotificationType;

/// Session states reported through [`Event`]s. The names are part of the
/// behavioral contract and must not be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    Connected,
    HasSession,
    Disconnected,
    Expired,
    AuthFailed,
}

impl std::fmt::Display for State {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let name = match self {
            State::Connecting => "Connecting",
            State::Connected => "Connected",
            State::HasSession => "HasSession",
            State::Disconnected => "Disconnected",
            State::Expired => "Expired",
            State::AuthFailed => "AuthFailed",
        };
        f.write_str(name)
    }
}

/// What an [`Event`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A session state transition.
    Session,
    /// A server-reported change on a watched path.
    Watch,
    /// A fault worth surfacing that is not itself a state transition.
    Error,
}

/// An immutable notification delivered to every consumer.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventType,
    pub state: State,
    /// Origin server, when the event is tied to one connection.
    pub server: Option<String>,
    /// Affected namespace path; empty for pure session events.
    pub path: String,
    /// Change class, present on watch events.
    pub notification: Option<NotificationType>,
    /// Server error code, when one accompanied the event.
    pub err: Option<ErrorCode>,
}

impl Event {
    pub(crate) fn session(
        state: State,
        server: Option<String>,
    ) -> Self {
        Self {
            kind: EventType::Session,
            state,
            server,
            path: String::new(),
            notification: None,
            err: None,
        }
    }

    pub(crate) fn watch(
        state: State,
        server: Option<String>,
        path: String,
        notification: NotificationType,
    ) -> Self {
        Self {
            kind: EventType::Watch,
            state,
            server,
            path,
            notification: Some(notification),
            err: None,
        }
    }
}
