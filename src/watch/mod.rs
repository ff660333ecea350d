//! One-shot watch interest registrations.
//!
//! A watch is registered as a side effect of a watch-bearing read and fires
//! at most once: the first matching server notification resolves it and
//! removes it. Multiple registrations on the same path and kind are
//! independent and each fires once. When the session expires the server has
//! forgotten the watch table, so the registry drops everything without
//! firing; an honored session resumption leaves the registry untouched
//! because the server kept the table.

mod registry;


pub use registry::WatchFuture;
pub use registry::WatchRegistry;

use crate::proto::NotificationType;

/// The interest class a registration was installed under, determined by the
/// read operation that installed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Installed by a data read; fires on data change or deletion.
    Data,
    /// Installed by an existence probe; also fires on creation.
    Exist,
    /// Installed by a children listing; fires on membership change.
    Child,
}

/// Which registration kinds a given server notification resolves.
pub(crate) fn kinds_for(notification: NotificationType) -> &'static [WatchKind] {
    match notification {
        NotificationType::NodeCreated => &[WatchKind::Exist],
        NotificationType::NodeDeleted => &[WatchKind::Exist, WatchKind::Data, WatchKind::Child],
        NotificationType::NodeDataChanged => &[WatchKind::Exist, WatchKind::Data],
        NotificationType::NodeChildrenChanged => &[WatchKind::Child],
    }
}
