//! Scriptable in-process mock ensemble.
//!
//! Every member accepts TCP connections on its own port and speaks the
//! client's wire protocol against a namespace shared by the whole cluster,
//! so a session granted by one member resumes on any other. Members can be
//! stopped and restarted, live connections can be severed, the cluster can
//! be put into a no-quorum mode where handshakes are dropped, and sessions
//! can be force-expired.

#![allow(dead_code)]

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::net::TcpSocket;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use keeper_client::proto::read_frame;
use keeper_client::proto::to_bytes;
use keeper_client::proto::write_frame;
use keeper_client::proto::Acl;
use keeper_client::proto::ConnectRequest;
use keeper_client::proto::ConnectResponse;
use keeper_client::proto::CreateRequest;
use keeper_client::proto::CreateResponse;
use keeper_client::proto::DeleteRequest;
use keeper_client::proto::ErrorCode;
use keeper_client::proto::GetChildrenResponse;
use keeper_client::proto::GetDataResponse;
use keeper_client::proto::NotificationType;
use keeper_client::proto::PathWatchRequest;
use keeper_client::proto::ReadRecord;
use keeper_client::proto::ReplyHeader;
use keeper_client::proto::RequestHeader;
use keeper_client::proto::SetDataRequest;
use keeper_client::proto::Stat;
use keeper_client::proto::StatResponse;
use keeper_client::proto::WatcherEvent;
use keeper_client::proto::WriteRecord;
use keeper_client::PING_XID;
use keeper_client::WATCH_XID;

const OP_CREATE: i32 = 1;
const OP_DELETE: i32 = 2;
const OP_EXISTS: i32 = 3;
const OP_GET_DATA: i32 = 4;
const OP_SET_DATA: i32 = 5;
const OP_GET_CHILDREN: i32 = 8;
const OP_PING: i32 = 11;
const OP_CLOSE: i32 = -11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WatchClass {
    Data,
    Exist,
    Child,
}

#[derive(Clone)]
struct NodeEntry {
    data: Bytes,
    version: i32,
    czxid: i64,
    mzxid: i64,
}

struct SessionRecord {
    password: Bytes,
}

/// State shared by every member of the cluster.
struct ClusterState {
    namespace: Mutex<HashMap<String, NodeEntry>>,
    sessions: Mutex<HashMap<i64, SessionRecord>>,
    /// Server-held watch table, keyed by session so it survives failover.
    watches: Mutex<HashMap<i64, HashSet<(String, WatchClass)>>>,
    /// Active connection per session: (connection id, outbound sender).
    conns: Mutex<HashMap<i64, (u64, mpsc::UnboundedSender<Bytes>)>>,
    next_session: AtomicI64,
    next_zxid: AtomicI64,
    next_conn: AtomicU64,
    /// With quorum lost, members still accept TCP but drop every handshake.
    healthy: AtomicBool,
}

impl ClusterState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            namespace: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            watches: Mutex::new(HashMap::new()),
            conns: Mutex::new(HashMap::new()),
            next_session: AtomicI64::new(0x1000),
            next_zxid: AtomicI64::new(1),
            next_conn: AtomicU64::new(1),
            healthy: AtomicBool::new(true),
        })
    }

    fn bump_zxid(&self) -> i64 {
        self.next_zxid.fetch_add(1, Ordering::Relaxed)
    }

    fn register_watch(
        &self,
        session: i64,
        path: &str,
        class: WatchClass,
    ) {
        self.watches
            .lock()
            .entry(session)
            .or_default()
            .insert((path.to_string(), class));
    }

    /// Fire and remove every server-held watch the change touches, pushing
    /// the notification to whichever connection currently serves each
    /// watching session.
    fn trigger_watches(
        &self,
        path: &str,
        notification: NotificationType,
    ) {
        let classes: &[WatchClass] = match notification {
            NotificationType::NodeCreated => &[WatchClass::Exist],
            NotificationType::NodeDeleted => {
                &[WatchClass::Data, WatchClass::Exist, WatchClass::Child]
            }
            NotificationType::NodeDataChanged => &[WatchClass::Data, WatchClass::Exist],
            NotificationType::NodeChildrenChanged => &[WatchClass::Child],
        };

        let mut hit_sessions = Vec::new();
        {
            let mut watches = self.watches.lock();
            for (session, entries) in watches.iter_mut() {
                let before = entries.len();
                entries.retain(|(p, class)| !(p == path && classes.contains(class)));
                if entries.len() != before {
                    hit_sessions.push(*session);
                }
            }
        }

        if hit_sessions.is_empty() {
            return;
        }
        let mut frame = BytesMut::new();
        ReplyHeader {
            xid: WATCH_XID,
            zxid: 0,
            err: 0,
        }
        .write(&mut frame);
        WatcherEvent {
            notification: notification.as_i32(),
            state: 3,
            path: path.to_string(),
        }
        .write(&mut frame);
        let frame = frame.freeze();

        let conns = self.conns.lock();
        for session in hit_sessions {
            if let Some((_, sender)) = conns.get(&session) {
                let _ = sender.send(frame.clone());
            }
        }
    }
}

fn parent_of(path: &str) -> Option<String> {
    let (parent, _) = path.rsplit_once('/')?;
    if parent.is_empty() {
        Some("/".to_string())
    } else {
        Some(parent.to_string())
    }
}

fn stat_of(entry: &NodeEntry) -> Stat {
    Stat {
        czxid: entry.czxid,
        mzxid: entry.mzxid,
        version: entry.version,
        data_length: entry.data.len() as i32,
        ..Stat::default()
    }
}

struct MemberControl {
    port: u16,
    accept_cancel: CancellationToken,
    conn_cancel: Arc<Mutex<CancellationToken>>,
}

/// A cluster of mock members sharing one namespace and session table.
pub struct MockCluster {
    state: Arc<ClusterState>,
    members: Mutex<HashMap<String, Arc<MemberControl>>>,
}

impl MockCluster {
    /// Start `n` members on ephemeral localhost ports.
    pub async fn start(n: usize) -> Self {
        let cluster = Self {
            state: ClusterState::new(),
            members: Mutex::new(HashMap::new()),
        };
        for _ in 0..n {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind member");
            let port = listener.local_addr().expect("local addr").port();
            cluster.spawn_member(listener, port);
        }
        cluster
    }

    pub fn addrs(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.members.lock().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    fn spawn_member(
        &self,
        listener: TcpListener,
        port: u16,
    ) {
        let addr = format!("127.0.0.1:{port}");
        let control = Arc::new(MemberControl {
            port,
            accept_cancel: CancellationToken::new(),
            conn_cancel: Arc::new(Mutex::new(CancellationToken::new())),
        });
        self.members.lock().insert(addr, control.clone());

        let state = self.state.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = control.accept_cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => break,
                    },
                };
                let conn_cancel = control.conn_cancel.lock().clone();
                let state = state.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = conn_cancel.cancelled() => {}
                        _ = serve_connection(stream, state) => {}
                    }
                });
            }
        });
    }

    /// Stop one member: stop accepting and sever its live connections. The
    /// port stays reserved for a later [`MockCluster::restart_member`].
    pub fn stop_member(
        &self,
        addr: &str,
    ) {
        let members = self.members.lock();
        let control = members.get(addr).expect("unknown member");
        control.accept_cancel.cancel();
        control.conn_cancel.lock().cancel();
    }

    /// Bring a stopped member back on its original port.
    pub async fn restart_member(
        &self,
        addr: &str,
    ) {
        let port = {
            let mut members = self.members.lock();
            let control = members.remove(addr).expect("unknown member");
            control.port
        };
        // Rebind the same port; reuseaddr shrugs off lingering TIME_WAIT
        // connections from the stopped incarnation.
        let socket = TcpSocket::new_v4().expect("socket");
        socket.set_reuseaddr(true).expect("reuseaddr");
        socket
            .bind(format!("127.0.0.1:{port}").parse().expect("addr"))
            .expect("rebind member port");
        let listener = socket.listen(16).expect("listen");
        self.spawn_member(listener, port);
    }

    /// Sever every live connection cluster-wide without stopping anyone.
    pub fn drop_connections(&self) {
        for control in self.members.lock().values() {
            let mut guard = control.conn_cancel.lock();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        self.state.conns.lock().clear();
    }

    /// Toggle quorum. Without it, members accept TCP but drop every
    /// handshake, exactly how a real ensemble sheds clients it cannot
    /// serve.
    pub fn set_quorum(
        &self,
        healthy: bool,
    ) {
        self.state.healthy.store(healthy, Ordering::Release);
    }

    /// Forget a session server-side; the next resumption attempt is
    /// rejected.
    pub fn expire_session(
        &self,
        session_id: i64,
    ) {
        self.state.sessions.lock().remove(&session_id);
        self.state.watches.lock().remove(&session_id);
    }

    /// Ids of every session the cluster has granted and not expired.
    pub fn live_sessions(&self) -> Vec<i64> {
        self.state.sessions.lock().keys().copied().collect()
    }
}

async fn serve_connection(
    stream: TcpStream,
    state: Arc<ClusterState>,
) {
    let mut stream = stream;

    let mut frame = match read_frame(&mut stream).await {
        Ok(frame) => frame,
        Err(_) => return,
    };
    let request = match ConnectRequest::read(&mut frame) {
        Ok(request) => request,
        Err(_) => return,
    };

    // No quorum: shed the client mid-handshake.
    if !state.healthy.load(Ordering::Acquire) {
        return;
    }

    let resolved = {
        let mut sessions = state.sessions.lock();
        if request.session_id != 0 {
            match sessions.get(&request.session_id) {
                Some(record) if record.password == request.password => {
                    Some((request.session_id, record.password.clone()))
                }
                // Unknown or mismatched: the session is gone.
                _ => None,
            }
        } else {
            let id = state.next_session.fetch_add(1, Ordering::Relaxed);
            let mut password = BytesMut::new();
            password.extend_from_slice(&id.to_be_bytes());
            password.extend_from_slice(&id.to_be_bytes());
            let password = password.freeze();
            sessions.insert(
                id,
                SessionRecord {
                    password: password.clone(),
                },
            );
            Some((id, password))
        }
    };
    let (session_id, password) = match resolved {
        Some(pair) => pair,
        None => {
            let reply = ConnectResponse {
                protocol_version: 0,
                timeout_ms: 0,
                session_id: 0,
                password: Bytes::new(),
            };
            let _ = write_frame(&mut stream, &to_bytes(&reply)).await;
            return;
        }
    };

    let reply = ConnectResponse {
        protocol_version: 0,
        timeout_ms: request.timeout_ms,
        session_id,
        password,
    };
    if write_frame(&mut stream, &to_bytes(&reply)).await.is_err() {
        return;
    }

    let (reader, writer) = stream.into_split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Bytes>();
    let conn_id = state.next_conn.fetch_add(1, Ordering::Relaxed);
    state
        .conns
        .lock()
        .insert(session_id, (conn_id, out_tx.clone()));

    let writer_task = tokio::spawn(pump_writer(writer, out_rx));

    let mut reader = reader;
    loop {
        let mut frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let header = match RequestHeader::read(&mut frame) {
            Ok(header) => header,
            Err(_) => break,
        };
        if header.opcode == OP_CLOSE {
            break;
        }
        let reply = handle_request(&state, session_id, header, frame);
        if out_tx.send(reply).is_err() {
            break;
        }
    }

    // Only forget the connection if a newer one has not replaced it.
    {
        let mut conns = state.conns.lock();
        if let Some((registered, _)) = conns.get(&session_id) {
            if *registered == conn_id {
                conns.remove(&session_id);
            }
        }
    }
    writer_task.abort();
}

async fn pump_writer(
    mut writer: OwnedWriteHalf,
    mut out_rx: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(frame) = out_rx.recv().await {
        if write_frame(&mut writer, &frame).await.is_err() {
            break;
        }
    }
}

fn reply_frame<R: WriteRecord>(
    header: ReplyHeader,
    body: Option<&R>,
) -> Bytes {
    let mut frame = BytesMut::new();
    header.write(&mut frame);
    if let Some(body) = body {
        body.write(&mut frame);
    }
    frame.freeze()
}

fn error_frame(
    xid: i32,
    code: ErrorCode,
) -> Bytes {
    reply_frame::<ReplyHeader>(
        ReplyHeader {
            xid,
            zxid: 0,
            err: code.as_i32(),
        },
        None,
    )
}

fn handle_request(
    state: &Arc<ClusterState>,
    session_id: i64,
    header: RequestHeader,
    mut body: Bytes,
) -> Bytes {
    match header.opcode {
        OP_PING => reply_frame::<ReplyHeader>(
            ReplyHeader {
                xid: PING_XID,
                zxid: 0,
                err: 0,
            },
            None,
        ),
        OP_CREATE => match CreateRequest::read(&mut body) {
            Ok(request) => {
                let created = {
                    let mut namespace = state.namespace.lock();
                    if namespace.contains_key(&request.path) {
                        None
                    } else {
                        let zxid = state.bump_zxid();
                        namespace.insert(
                            request.path.clone(),
                            NodeEntry {
                                data: request.data.clone(),
                                version: 0,
                                czxid: zxid,
                                mzxid: zxid,
                            },
                        );
                        Some(zxid)
                    }
                };
                match created {
                    Some(zxid) => {
                        state.trigger_watches(&request.path, NotificationType::NodeCreated);
                        if let Some(parent) = parent_of(&request.path) {
                            state
                                .trigger_watches(&parent, NotificationType::NodeChildrenChanged);
                        }
                        reply_frame(
                            ReplyHeader {
                                xid: header.xid,
                                zxid,
                                err: 0,
                            },
                            Some(&CreateResponse { path: request.path }),
                        )
                    }
                    None => error_frame(header.xid, ErrorCode::NodeExists),
                }
            }
            Err(_) => error_frame(header.xid, ErrorCode::MarshallingError),
        },
        OP_DELETE => match DeleteRequest::read(&mut body) {
            Ok(request) => {
                let removed = {
                    let mut namespace = state.namespace.lock();
                    match namespace.get(&request.path) {
                        None => Err(ErrorCode::NoNode),
                        Some(entry)
                            if request.version != -1 && request.version != entry.version =>
                        {
                            Err(ErrorCode::BadVersion)
                        }
                        Some(_) => {
                            namespace.remove(&request.path);
                            Ok(state.bump_zxid())
                        }
                    }
                };
                match removed {
                    Ok(zxid) => {
                        state.trigger_watches(&request.path, NotificationType::NodeDeleted);
                        if let Some(parent) = parent_of(&request.path) {
                            state
                                .trigger_watches(&parent, NotificationType::NodeChildrenChanged);
                        }
                        reply_frame::<ReplyHeader>(
                            ReplyHeader {
                                xid: header.xid,
                                zxid,
                                err: 0,
                            },
                            None,
                        )
                    }
                    Err(code) => error_frame(header.xid, code),
                }
            }
            Err(_) => error_frame(header.xid, ErrorCode::MarshallingError),
        },
        OP_SET_DATA => match SetDataRequest::read(&mut body) {
            Ok(request) => {
                let updated = {
                    let mut namespace = state.namespace.lock();
                    match namespace.get_mut(&request.path) {
                        None => Err(ErrorCode::NoNode),
                        Some(entry)
                            if request.version != -1 && request.version != entry.version =>
                        {
                            Err(ErrorCode::BadVersion)
                        }
                        Some(entry) => {
                            let zxid = state.bump_zxid();
                            entry.data = request.data.clone();
                            entry.version += 1;
                            entry.mzxid = zxid;
                            Ok((zxid, stat_of(entry)))
                        }
                    }
                };
                match updated {
                    Ok((zxid, stat)) => {
                        state.trigger_watches(&request.path, NotificationType::NodeDataChanged);
                        reply_frame(
                            ReplyHeader {
                                xid: header.xid,
                                zxid,
                                err: 0,
                            },
                            Some(&StatResponse { stat }),
                        )
                    }
                    Err(code) => error_frame(header.xid, code),
                }
            }
            Err(_) => error_frame(header.xid, ErrorCode::MarshallingError),
        },
        OP_GET_DATA => match PathWatchRequest::read(&mut body) {
            Ok(request) => {
                let found = state.namespace.lock().get(&request.path).cloned();
                match found {
                    Some(entry) => {
                        if request.watch {
                            state.register_watch(session_id, &request.path, WatchClass::Data);
                        }
                        reply_frame(
                            ReplyHeader {
                                xid: header.xid,
                                zxid: entry.mzxid,
                                err: 0,
                            },
                            Some(&GetDataResponse {
                                data: entry.data.clone(),
                                stat: stat_of(&entry),
                            }),
                        )
                    }
                    None => error_frame(header.xid, ErrorCode::NoNode),
                }
            }
            Err(_) => error_frame(header.xid, ErrorCode::MarshallingError),
        },
        OP_EXISTS => match PathWatchRequest::read(&mut body) {
            Ok(request) => {
                if request.watch {
                    state.register_watch(session_id, &request.path, WatchClass::Exist);
                }
                let found = state.namespace.lock().get(&request.path).cloned();
                match found {
                    Some(entry) => reply_frame(
                        ReplyHeader {
                            xid: header.xid,
                            zxid: entry.mzxid,
                            err: 0,
                        },
                        Some(&StatResponse {
                            stat: stat_of(&entry),
                        }),
                    ),
                    None => error_frame(header.xid, ErrorCode::NoNode),
                }
            }
            Err(_) => error_frame(header.xid, ErrorCode::MarshallingError),
        },
        OP_GET_CHILDREN => match PathWatchRequest::read(&mut body) {
            Ok(request) => {
                let namespace = state.namespace.lock();
                if !namespace.contains_key(&request.path) && request.path != "/" {
                    return error_frame(header.xid, ErrorCode::NoNode);
                }
                let children: Vec<String> = namespace
                    .keys()
                    .filter(|candidate| {
                        parent_of(candidate).as_deref() == Some(request.path.as_str())
                    })
                    .filter_map(|candidate| {
                        candidate.rsplit_once('/').map(|(_, name)| name.to_string())
                    })
                    .collect();
                drop(namespace);
                if request.watch {
                    state.register_watch(session_id, &request.path, WatchClass::Child);
                }
                reply_frame(
                    ReplyHeader {
                        xid: header.xid,
                        zxid: 0,
                        err: 0,
                    },
                    Some(&GetChildrenResponse { children }),
                )
            }
            Err(_) => error_frame(header.xid, ErrorCode::MarshallingError),
        },
        _ => error_frame(header.xid, ErrorCode::Unimplemented),
    }
}

/// Default ACL used throughout the integration tests.
pub fn open_acl() -> Vec<Acl> {
    Acl::world_all()
}
