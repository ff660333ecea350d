//! Public client handle.
//!
//! All data operations delegate to the request multiplexer; the connection
//! supervisor behind it decides which ensemble member actually serves them.
//! Operations never see "which server" — a session is one logical
//! connection to the ensemble, wherever it currently lands.

use std::sync::Arc;

use bytes::Bytes;
use bytes::BytesMut;
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::Error;
use crate::errors::Result;
use crate::events::Event;
use crate::events::EventWatcher;
use crate::proto::Acl;
use crate::proto::CreateMode;
use crate::proto::CreateRequest;
use crate::proto::CreateResponse;
use crate::proto::DeleteRequest;
use crate::proto::GetChildrenResponse;
use crate::proto::GetDataResponse;
use crate::proto::OpCode;
use crate::proto::PathWatchRequest;
use crate::proto::ReadRecord;
use crate::proto::RequestHeader;
use crate::proto::SetDataRequest;
use crate::proto::Stat;
use crate::proto::StatResponse;
use crate::proto::WriteRecord;
use crate::session::SessionHandle;
use crate::session::WatchInstall;
use crate::watch::WatchFuture;
use crate::watch::WatchKind;

/// Handle to one logical session against the ensemble.
///
/// Created through [`ClientBuilder`](crate::ClientBuilder). Cheap to share
/// by reference; the session lives until [`close`](Client::close) or drop.
pub struct Client {
    pub(crate) handle: Arc<SessionHandle>,
    pub(crate) config: ClientConfig,
}

impl Client {
    /// Create a node. Returns the server-assigned path, which differs from
    /// the requested one for sequential modes.
    pub async fn create(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        mode: CreateMode,
        acl: Vec<Acl>,
    ) -> Result<String> {
        let request = CreateRequest {
            path: path.to_string(),
            data: data.into(),
            acl,
            flags: mode as i32,
        };
        let reply = self
            .handle
            .mux
            .submit(OpCode::Create, &request, None, self.config.request_timeout())
            .await?;
        let mut body = reply.body;
        let response = CreateResponse::read(&mut body)?;
        debug!(path = %response.path, "node created");
        Ok(response.path)
    }

    /// Read a node's data and metadata.
    pub async fn get(
        &self,
        path: &str,
    ) -> Result<(Bytes, Stat)> {
        let request = PathWatchRequest {
            path: path.to_string(),
            watch: false,
        };
        let reply = self
            .handle
            .mux
            .submit(
                OpCode::GetData,
                &request,
                None,
                self.config.request_timeout(),
            )
            .await?;
        let mut body = reply.body;
        let response = GetDataResponse::read(&mut body)?;
        Ok((response.data, response.stat))
    }

    /// Read a node's data and leave a one-shot data watch behind. The watch
    /// is installed before this returns, so no change between the read and
    /// the installation can be missed.
    pub async fn get_watch(
        &self,
        path: &str,
    ) -> Result<(Bytes, Stat, WatchFuture)> {
        let request = PathWatchRequest {
            path: path.to_string(),
            watch: true,
        };
        let (slot, rx) = oneshot::channel();
        let reply = self
            .handle
            .mux
            .submit(
                OpCode::GetData,
                &request,
                Some(WatchInstall {
                    path: path.to_string(),
                    kind: WatchKind::Data,
                    slot,
                }),
                self.config.request_timeout(),
            )
            .await?;
        let mut body = reply.body;
        let response = GetDataResponse::read(&mut body)?;
        Ok((response.data, response.stat, WatchFuture::new(rx)))
    }

    /// Replace a node's data. `expected_version == -1` skips the version
    /// check.
    pub async fn set(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        expected_version: i32,
    ) -> Result<Stat> {
        let request = SetDataRequest {
            path: path.to_string(),
            data: data.into(),
            version: expected_version,
        };
        let reply = self
            .handle
            .mux
            .submit(
                OpCode::SetData,
                &request,
                None,
                self.config.request_timeout(),
            )
            .await?;
        let mut body = reply.body;
        Ok(StatResponse::read(&mut body)?.stat)
    }

    /// Delete a node. `expected_version == -1` skips the version check.
    pub async fn delete(
        &self,
        path: &str,
        expected_version: i32,
    ) -> Result<()> {
        let request = DeleteRequest {
            path: path.to_string(),
            version: expected_version,
        };
        self.handle
            .mux
            .submit(OpCode::Delete, &request, None, self.config.request_timeout())
            .await?;
        debug!(path, "node deleted");
        Ok(())
    }

    /// Probe for a node. `None` when it does not exist.
    pub async fn exists(
        &self,
        path: &str,
    ) -> Result<Option<Stat>> {
        let request = PathWatchRequest {
            path: path.to_string(),
            watch: false,
        };
        let outcome = self
            .handle
            .mux
            .submit(OpCode::Exists, &request, None, self.config.request_timeout())
            .await;
        match outcome {
            Ok(reply) => {
                let mut body = reply.body;
                Ok(Some(StatResponse::read(&mut body)?.stat))
            }
            Err(Error::NodeNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Probe for a node and leave a one-shot existence watch behind. The
    /// watch is installed whether or not the node exists — observing a
    /// future creation is the point of probing an absent path.
    pub async fn exists_watch(
        &self,
        path: &str,
    ) -> Result<(Option<Stat>, WatchFuture)> {
        let request = PathWatchRequest {
            path: path.to_string(),
            watch: true,
        };
        let (slot, rx) = oneshot::channel();
        let outcome = self
            .handle
            .mux
            .submit(
                OpCode::Exists,
                &request,
                Some(WatchInstall {
                    path: path.to_string(),
                    kind: WatchKind::Exist,
                    slot,
                }),
                self.config.request_timeout(),
            )
            .await;
        match outcome {
            Ok(reply) => {
                let mut body = reply.body;
                Ok((
                    Some(StatResponse::read(&mut body)?.stat),
                    WatchFuture::new(rx),
                ))
            }
            Err(Error::NodeNotFound) => Ok((None, WatchFuture::new(rx))),
            Err(e) => Err(e),
        }
    }

    /// List a node's children.
    pub async fn children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        let request = PathWatchRequest {
            path: path.to_string(),
            watch: false,
        };
        let reply = self
            .handle
            .mux
            .submit(
                OpCode::GetChildren,
                &request,
                None,
                self.config.request_timeout(),
            )
            .await?;
        let mut body = reply.body;
        Ok(GetChildrenResponse::read(&mut body)?.children)
    }

    /// List a node's children and leave a one-shot child watch behind.
    pub async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, WatchFuture)> {
        let request = PathWatchRequest {
            path: path.to_string(),
            watch: true,
        };
        let (slot, rx) = oneshot::channel();
        let reply = self
            .handle
            .mux
            .submit(
                OpCode::GetChildren,
                &request,
                Some(WatchInstall {
                    path: path.to_string(),
                    kind: WatchKind::Child,
                    slot,
                }),
                self.config.request_timeout(),
            )
            .await?;
        let mut body = reply.body;
        Ok((
            GetChildrenResponse::read(&mut body)?.children,
            WatchFuture::new(rx),
        ))
    }

    /// Register a predicate-based diagnostic observer against the event
    /// stream. Fires at most once.
    pub fn observe<F>(
        &self,
        predicate: F,
    ) -> EventWatcher
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.handle.dispatcher.observe(predicate)
    }

    /// Current session id, `0` before the first handshake and after expiry.
    /// Equality across a reconnection means the server honored resumption.
    pub fn session_id(&self) -> i64 {
        self.handle.info.load().id
    }

    /// Server-negotiated session timeout in milliseconds.
    pub fn session_timeout_ms(&self) -> i32 {
        self.handle.info.load().timeout_ms
    }

    /// Close the session. Idempotent. Pending requests and outstanding
    /// watches resolve with [`Error::ConnectionClosed`]; the event channel
    /// reaches end-of-stream once the supervisor has wound down. Every
    /// operation after this fails immediately.
    pub fn close(&self) {
        if self.handle.mux.is_closed() {
            return;
        }
        debug!(session_id = self.session_id(), "closing session");
        self.handle.mux.close();

        // Best-effort goodbye so the server can drop ephemeral state now
        // instead of waiting out the session timeout.
        let mut frame = BytesMut::new();
        RequestHeader {
            xid: 0,
            opcode: OpCode::CloseSession as i32,
        }
        .write(&mut frame);
        self.handle.mux.send_raw(frame.freeze());

        self.handle.cancel.cancel();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
