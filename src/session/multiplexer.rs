//! Request multiplexer: one monotonically increasing transaction id per
//! outbound request, an `xid → pending` table, and routing of inbound
//! replies back to the callers suspended on them.

use std::sync::atomic::AtomicI32;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::trace;
use tracing::warn;

use crate::errors::Error;
use crate::errors::Result;
use crate::events::Event;
use crate::proto::OpCode;
use crate::proto::ReplyHeader;
use crate::proto::RequestHeader;
use crate::proto::WriteRecord;
use crate::watch::WatchKind;
use crate::watch::WatchRegistry;

/// A decoded successful reply: the server's transaction stamp plus the
/// operation-specific body, left for the caller to decode.
#[derive(Debug)]
pub(crate) struct Reply {
    #[allow(dead_code)]
    pub(crate) zxid: i64,
    pub(crate) body: Bytes,
}

/// Watch interest to be installed when the reply proves the read succeeded.
/// Installation happens on the receive path, before the caller is woken, so
/// no change can slip between response delivery and registration.
pub(crate) struct WatchInstall {
    pub(crate) path: String,
    pub(crate) kind: WatchKind,
    pub(crate) slot: oneshot::Sender<Result<Event>>,
}

struct PendingRequest {
    opcode: OpCode,
    slot: oneshot::Sender<Result<Reply>>,
    watch: Option<WatchInstall>,
}

pub(crate) struct Multiplexer {
    next_xid: AtomicI32,
    pending: DashMap<i32, PendingRequest>,
    /// Sender for the active connection's outbound queue; `None` while
    /// disconnected, so submissions fail fast instead of queueing into a
    /// connection that does not exist.
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    closed: AtomicBool,
}

impl Multiplexer {
    pub(crate) fn new() -> Self {
        Self {
            next_xid: AtomicI32::new(1),
            pending: DashMap::new(),
            outbound: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate the next xid. Stays in the positive range so it can never
    /// collide with the reserved server-push sentinels; wrapping is
    /// acceptable because a table simultaneously holding 2^31 requests is
    /// not.
    fn next_xid(&self) -> i32 {
        let raw = self.next_xid.fetch_add(1, Ordering::Relaxed);
        (raw & 0x7fff_ffff).max(1)
    }

    /// Submit one request and suspend until its reply, a teardown, close or
    /// the deadline. The entry stays tracked past a deadline expiry — the
    /// xid is not reusable until the connection resolves it.
    pub(crate) async fn submit<R>(
        &self,
        opcode: OpCode,
        record: &R,
        watch: Option<WatchInstall>,
        deadline: Duration,
    ) -> Result<Reply>
    where
        R: WriteRecord,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }

        let xid = self.next_xid();
        let mut frame = BytesMut::new();
        RequestHeader {
            xid,
            opcode: opcode as i32,
        }
        .write(&mut frame);
        record.write(&mut frame);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            xid,
            PendingRequest {
                opcode,
                slot: tx,
                watch,
            },
        );
        trace!(xid, ?opcode, "request submitted");

        // Hand the frame to the active connection, if any. The lock is
        // only held to clone the sender, never across the send itself.
        let sender = self.outbound.lock().clone();
        match sender {
            Some(sender) => {
                if sender.send(frame.freeze()).is_err() {
                    // Connection torn down between attach and send; the
                    // teardown sweep may already have resolved us, so take
                    // the entry back if it is still there.
                    self.pending.remove(&xid);
                    return Err(Error::ConnectionClosed);
                }
            }
            None => {
                self.pending.remove(&xid);
                return Err(Error::ConnectionClosed);
            }
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Resolver dropped without sending; treated as a teardown.
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Route one inbound reply to its caller. Installs the pending watch
    /// registration first when the outcome allows one, so the registration
    /// exists before the caller observes the result.
    pub(crate) fn resolve(
        &self,
        header: ReplyHeader,
        body: Bytes,
        registry: &WatchRegistry,
    ) {
        let Some((_, entry)) = self.pending.remove(&header.xid) else {
            warn!(xid = header.xid, "reply for unknown xid, dropping");
            return;
        };

        let err = crate::proto::ErrorCode::from_i32(header.err);
        if let Some(install) = entry.watch {
            // An existence probe installs its watch even when the node is
            // absent; that is the whole point of probing.
            let installable = err == crate::proto::ErrorCode::Ok
                || (err == crate::proto::ErrorCode::NoNode && install.kind == WatchKind::Exist);
            if installable {
                registry.install(&install.path, install.kind, install.slot);
            }
        }

        let outcome = if err == crate::proto::ErrorCode::Ok {
            Ok(Reply {
                zxid: header.zxid,
                body,
            })
        } else {
            Err(Error::from(err))
        };

        trace!(xid = header.xid, opcode = ?entry.opcode, "reply delivered");
        // Callers that timed out are gone; that is fine.
        let _ = entry.slot.send(outcome);
    }

    /// Resolve every pending request with `make_err`. Used at teardown
    /// (`ConnectionClosed`), expiry (`SessionExpired`) and close.
    pub(crate) fn fail_all<F>(
        &self,
        make_err: F,
    ) where
        F: Fn() -> Error,
    {
        let xids: Vec<i32> = self.pending.iter().map(|e| *e.key()).collect();
        for xid in xids {
            if let Some((_, entry)) = self.pending.remove(&xid) {
                let _ = entry.slot.send(Err(make_err()));
            }
        }
    }

    /// Install the outbound queue of a freshly established connection.
    pub(crate) fn attach(
        &self,
        sender: mpsc::UnboundedSender<Bytes>,
    ) {
        *self.outbound.lock() = Some(sender);
    }

    /// Drop the outbound queue on teardown; later submissions fail fast.
    pub(crate) fn detach(&self) {
        self.outbound.lock().take();
    }

    /// Best-effort send outside the pending table, for fire-and-forget
    /// frames like the close request.
    pub(crate) fn send_raw(
        &self,
        frame: Bytes,
    ) {
        if let Some(sender) = self.outbound.lock().as_ref() {
            let _ = sender.send(frame);
        }
    }

    /// Flip the terminal closed flag. Every later submit fails immediately.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pending entries, for diagnostics and tests.
    #[allow(dead_code)]
    pub(crate) fn in_flight(&self) -> usize {
        self.pending.len()
    }
}
