//! Record types of the ensemble protocol: the connect handshake, tagged
//! request/reply headers, namespace operation payloads and server-pushed
//! watch notifications.

use bytes::Bytes;
use bytes::BytesMut;

use super::codec::get_bool;
use super::codec::get_buffer;
use super::codec::get_i32;
use super::codec::get_i64;
use super::codec::get_string;
use super::codec::get_string_list;
use super::codec::put_bool;
use super::codec::put_buffer;
use super::codec::put_i32;
use super::codec::put_i64;
use super::codec::put_string;
use super::codec::ReadRecord;
use super::codec::WriteRecord;
use crate::errors::Error;
use crate::errors::Result;

/// Operation tags carried in every request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpCode {
    Create = 1,
    Delete = 2,
    Exists = 3,
    GetData = 4,
    SetData = 5,
    GetChildren = 8,
    Ping = 11,
    CloseSession = -11,
}

/// Server-reported error codes. Negative on the wire; `Ok` is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    SystemError,
    ConnectionLoss,
    MarshallingError,
    Unimplemented,
    OperationTimeout,
    BadArguments,
    NoNode,
    NoAuth,
    BadVersion,
    NoChildrenForEphemerals,
    NodeExists,
    NotEmpty,
    SessionExpired,
    InvalidAcl,
    AuthFailed,
    /// Anything this client has no dedicated mapping for.
    Other(i32),
}

impl ErrorCode {
    pub fn from_i32(raw: i32) -> Self {
        match raw {
            0 => ErrorCode::Ok,
            -1 => ErrorCode::SystemError,
            -4 => ErrorCode::ConnectionLoss,
            -5 => ErrorCode::MarshallingError,
            -6 => ErrorCode::Unimplemented,
            -7 => ErrorCode::OperationTimeout,
            -8 => ErrorCode::BadArguments,
            -101 => ErrorCode::NoNode,
            -102 => ErrorCode::NoAuth,
            -103 => ErrorCode::BadVersion,
            -108 => ErrorCode::NoChildrenForEphemerals,
            -110 => ErrorCode::NodeExists,
            -111 => ErrorCode::NotEmpty,
            -112 => ErrorCode::SessionExpired,
            -114 => ErrorCode::InvalidAcl,
            -115 => ErrorCode::AuthFailed,
            other => ErrorCode::Other(other),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::SystemError => -1,
            ErrorCode::ConnectionLoss => -4,
            ErrorCode::MarshallingError => -5,
            ErrorCode::Unimplemented => -6,
            ErrorCode::OperationTimeout => -7,
            ErrorCode::BadArguments => -8,
            ErrorCode::NoNode => -101,
            ErrorCode::NoAuth => -102,
            ErrorCode::BadVersion => -103,
            ErrorCode::NoChildrenForEphemerals => -108,
            ErrorCode::NodeExists => -110,
            ErrorCode::NotEmpty => -111,
            ErrorCode::SessionExpired => -112,
            ErrorCode::InvalidAcl => -114,
            ErrorCode::AuthFailed => -115,
            ErrorCode::Other(raw) => *raw,
        }
    }
}

/// Session handshake sent as the first frame of every connection attempt.
///
/// A zero `session_id` with an empty password requests a brand-new session;
/// non-zero values request resumption of an existing one.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub protocol_version: i32,
    pub last_zxid_seen: i64,
    pub timeout_ms: i32,
    pub session_id: i64,
    pub password: Bytes,
}

impl WriteRecord for ConnectRequest {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_i32(buf, self.protocol_version);
        put_i64(buf, self.last_zxid_seen);
        put_i32(buf, self.timeout_ms);
        put_i64(buf, self.session_id);
        put_buffer(buf, &self.password);
    }
}

impl ReadRecord for ConnectRequest {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            protocol_version: get_i32(buf)?,
            last_zxid_seen: get_i64(buf)?,
            timeout_ms: get_i32(buf)?,
            session_id: get_i64(buf)?,
            password: get_buffer(buf)?,
        })
    }
}

/// Handshake reply. A non-positive `timeout_ms` means the server refused to
/// resume the requested session.
#[derive(Debug, Clone)]
pub struct ConnectResponse {
    pub protocol_version: i32,
    pub timeout_ms: i32,
    pub session_id: i64,
    pub password: Bytes,
}

impl ReadRecord for ConnectResponse {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            protocol_version: get_i32(buf)?,
            timeout_ms: get_i32(buf)?,
            session_id: get_i64(buf)?,
            password: get_buffer(buf)?,
        })
    }
}

impl WriteRecord for ConnectResponse {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_i32(buf, self.protocol_version);
        put_i32(buf, self.timeout_ms);
        put_i64(buf, self.session_id);
        put_buffer(buf, &self.password);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RequestHeader {
    pub xid: i32,
    pub opcode: i32,
}

impl WriteRecord for RequestHeader {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_i32(buf, self.xid);
        put_i32(buf, self.opcode);
    }
}

impl ReadRecord for RequestHeader {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            xid: get_i32(buf)?,
            opcode: get_i32(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReplyHeader {
    pub xid: i32,
    pub zxid: i64,
    pub err: i32,
}

impl ReadRecord for ReplyHeader {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            xid: get_i32(buf)?,
            zxid: get_i64(buf)?,
            err: get_i32(buf)?,
        })
    }
}

impl WriteRecord for ReplyHeader {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_i32(buf, self.xid);
        put_i64(buf, self.zxid);
        put_i32(buf, self.err);
    }
}

/// Node metadata returned by read operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub czxid: i64,
    pub mzxid: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub version: i32,
    pub cversion: i32,
    pub aversion: i32,
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
    pub pzxid: i64,
}

impl ReadRecord for Stat {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            czxid: get_i64(buf)?,
            mzxid: get_i64(buf)?,
            ctime: get_i64(buf)?,
            mtime: get_i64(buf)?,
            version: get_i32(buf)?,
            cversion: get_i32(buf)?,
            aversion: get_i32(buf)?,
            ephemeral_owner: get_i64(buf)?,
            data_length: get_i32(buf)?,
            num_children: get_i32(buf)?,
            pzxid: get_i64(buf)?,
        })
    }
}

impl WriteRecord for Stat {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_i64(buf, self.czxid);
        put_i64(buf, self.mzxid);
        put_i64(buf, self.ctime);
        put_i64(buf, self.mtime);
        put_i32(buf, self.version);
        put_i32(buf, self.cversion);
        put_i32(buf, self.aversion);
        put_i64(buf, self.ephemeral_owner);
        put_i32(buf, self.data_length);
        put_i32(buf, self.num_children);
        put_i64(buf, self.pzxid);
    }
}

/// Node lifetime and naming semantics requested at creation, carried as the
/// `flags` field of a [`CreateRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum CreateMode {
    #[default]
    Persistent = 0,
    /// Deleted by the server when the creating session ends.
    Ephemeral = 1,
    /// The server appends a monotonically increasing suffix to the path.
    PersistentSequential = 2,
    EphemeralSequential = 3,
}

/// Access-control entry attached to a node at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub perms: i32,
    pub scheme: String,
    pub id: String,
}

/// All permission bits set.
pub const PERM_ALL: i32 = 0x1f;

impl Acl {
    /// The open ACL: full permissions for anyone.
    pub fn world_all() -> Vec<Acl> {
        vec![Acl {
            perms: PERM_ALL,
            scheme: "world".to_string(),
            id: "anyone".to_string(),
        }]
    }
}

impl WriteRecord for Acl {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_i32(buf, self.perms);
        put_string(buf, &self.scheme);
        put_string(buf, &self.id);
    }
}

impl ReadRecord for Acl {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            perms: get_i32(buf)?,
            scheme: get_string(buf)?,
            id: get_string(buf)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub path: String,
    pub data: Bytes,
    pub acl: Vec<Acl>,
    pub flags: i32,
}

impl WriteRecord for CreateRequest {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_string(buf, &self.path);
        put_buffer(buf, &self.data);
        put_i32(buf, self.acl.len() as i32);
        for acl in &self.acl {
            acl.write(buf);
        }
        put_i32(buf, self.flags);
    }
}

impl ReadRecord for CreateRequest {
    fn read(buf: &mut Bytes) -> Result<Self> {
        let path = get_string(buf)?;
        let data = get_buffer(buf)?;
        let count = get_i32(buf)?;
        let mut acl = Vec::new();
        for _ in 0..count.max(0) {
            acl.push(Acl::read(buf)?);
        }
        let flags = get_i32(buf)?;
        Ok(Self {
            path,
            data,
            acl,
            flags,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateResponse {
    pub path: String,
}

impl ReadRecord for CreateResponse {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            path: get_string(buf)?,
        })
    }
}

impl WriteRecord for CreateResponse {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_string(buf, &self.path);
    }
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub path: String,
    pub version: i32,
}

impl WriteRecord for DeleteRequest {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_string(buf, &self.path);
        put_i32(buf, self.version);
    }
}

impl ReadRecord for DeleteRequest {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            path: get_string(buf)?,
            version: get_i32(buf)?,
        })
    }
}

/// Shared shape of `GetData`/`Exists`/`GetChildren` requests: a path and a
/// watch-interest flag.
#[derive(Debug, Clone)]
pub struct PathWatchRequest {
    pub path: String,
    pub watch: bool,
}

impl WriteRecord for PathWatchRequest {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_string(buf, &self.path);
        put_bool(buf, self.watch);
    }
}

impl ReadRecord for PathWatchRequest {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            path: get_string(buf)?,
            watch: get_bool(buf)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GetDataResponse {
    pub data: Bytes,
    pub stat: Stat,
}

impl ReadRecord for GetDataResponse {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            data: get_buffer(buf)?,
            stat: Stat::read(buf)?,
        })
    }
}

impl WriteRecord for GetDataResponse {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_buffer(buf, &self.data);
        self.stat.write(buf);
    }
}

#[derive(Debug, Clone)]
pub struct SetDataRequest {
    pub path: String,
    pub data: Bytes,
    pub version: i32,
}

impl WriteRecord for SetDataRequest {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_string(buf, &self.path);
        put_buffer(buf, &self.data);
        put_i32(buf, self.version);
    }
}

impl ReadRecord for SetDataRequest {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            path: get_string(buf)?,
            data: get_buffer(buf)?,
            version: get_i32(buf)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StatResponse {
    pub stat: Stat,
}

impl ReadRecord for StatResponse {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            stat: Stat::read(buf)?,
        })
    }
}

impl WriteRecord for StatResponse {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        self.stat.write(buf);
    }
}

#[derive(Debug, Clone)]
pub struct GetChildrenResponse {
    pub children: Vec<String>,
}

impl ReadRecord for GetChildrenResponse {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            children: get_string_list(buf)?,
        })
    }
}

impl WriteRecord for GetChildrenResponse {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_i32(buf, self.children.len() as i32);
        for child in &self.children {
            put_string(buf, child);
        }
    }
}

/// Change classes the server reports through watch notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

impl NotificationType {
    pub fn from_i32(raw: i32) -> Result<Self> {
        match raw {
            1 => Ok(NotificationType::NodeCreated),
            2 => Ok(NotificationType::NodeDeleted),
            3 => Ok(NotificationType::NodeDataChanged),
            4 => Ok(NotificationType::NodeChildrenChanged),
            other => Err(Error::Protocol(format!(
                "unknown watch notification type {other}"
            ))),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            NotificationType::NodeCreated => 1,
            NotificationType::NodeDeleted => 2,
            NotificationType::NodeDataChanged => 3,
            NotificationType::NodeChildrenChanged => 4,
        }
    }
}

/// Server-pushed watch notification, delivered under the watch xid sentinel.
#[derive(Debug, Clone)]
pub struct WatcherEvent {
    pub notification: i32,
    pub state: i32,
    pub path: String,
}

impl ReadRecord for WatcherEvent {
    fn read(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            notification: get_i32(buf)?,
            state: get_i32(buf)?,
            path: get_string(buf)?,
        })
    }
}

impl WriteRecord for WatcherEvent {
    fn write(
        &self,
        buf: &mut BytesMut,
    ) {
        put_i32(buf, self.notification);
        put_i32(buf, self.state);
        put_string(buf, &self.path);
    }
}
