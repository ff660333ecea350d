//! Connection supervisor: the session state machine.
//!
//! One task owns the socket end-to-end. Per attempt it dials the next
//! ensemble candidate, performs the session handshake (requesting resumption
//! whenever a session already exists), then runs split send/receive loops
//! until the connection dies or the client is closed. Every failure short of
//! explicit close routes back into another attempt; quorum loss on the
//! ensemble side is indistinguishable from any other repeated failure and is
//! deliberately not special-cased.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use bytes::BytesMut;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep_until;
use tokio::time::timeout;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::SessionHandle;
use super::SessionInfo;
use crate::config::ClientConfig;
use crate::constants::KEEPALIVE_DIVISOR;
use crate::constants::PING_XID;
use crate::constants::WATCH_XID;
use crate::errors::Error;
use crate::events::Event;
use crate::events::State;
use crate::hosts::HostList;
use crate::proto::read_frame;
use crate::proto::write_frame;
use crate::proto::ConnectRequest;
use crate::proto::ConnectResponse;
use crate::proto::NotificationType;
use crate::proto::OpCode;
use crate::proto::ReadRecord;
use crate::proto::ReplyHeader;
use crate::proto::RequestHeader;
use crate::proto::WatcherEvent;
use crate::proto::WriteRecord;

/// Session secrets and resumption state. Owned exclusively by the
/// supervisor task; the rest of the crate sees only the published
/// [`SessionInfo`] snapshot.
#[derive(Debug, Default)]
struct Session {
    id: i64,
    password: Bytes,
    last_zxid: i64,
}

/// How one connection attempt ended.
enum Attempt {
    /// Explicit close; the supervisor is done.
    Closed,
    /// TCP never came up; move to the next candidate silently.
    DialFailed,
    /// The connection existed and was lost (handshake failure, keep-alive
    /// miss, socket error, rejected resumption). Emits `Disconnected`.
    Dropped,
}

/// How the established duplex phase ended.
enum Serve {
    Closed,
    Lost,
}

pub(crate) struct Supervisor {
    config: ClientConfig,
    hosts: HostList,
    handle: Arc<SessionHandle>,
    session: Session,
    failed_cycles: u32,
}

impl Supervisor {
    pub(crate) fn new(
        servers: Vec<String>,
        config: ClientConfig,
        handle: Arc<SessionHandle>,
    ) -> Self {
        let hosts = HostList::new(servers, config.shuffle_hosts);
        Self {
            config,
            hosts,
            handle,
            session: Session::default(),
            failed_cycles: 0,
        }
    }

    /// Run until explicit close. I/O failures never end this loop.
    pub(crate) async fn run(mut self) {
        loop {
            if self.handle.cancel.is_cancelled() {
                break;
            }

            let (addr, cycle_complete) = self.hosts.next_candidate();
            if cycle_complete {
                let delay = self.config.reconnect.delay_for_cycle(self.failed_cycles);
                debug!(
                    failed_cycles = self.failed_cycles,
                    ?delay,
                    "address list exhausted, backing off"
                );
                tokio::select! {
                    _ = self.handle.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                self.failed_cycles = self.failed_cycles.saturating_add(1);
            }

            self.publish_state(State::Connecting, &addr);
            match self.connect_and_serve(&addr).await {
                Attempt::Closed => break,
                Attempt::DialFailed => {
                    trace!(server = %addr, "candidate unreachable");
                }
                Attempt::Dropped => {
                    self.publish_state(State::Disconnected, &addr);
                }
            }
        }

        debug!("supervisor stopped");
        self.handle.mux.close();
        self.handle.mux.fail_all(|| Error::ConnectionClosed);
        self.handle.registry.abort_all(|| Error::ConnectionClosed);
        self.handle.dispatcher.close();
    }

    /// One full attempt against one candidate: dial, handshake, duplex.
    async fn connect_and_serve(
        &mut self,
        addr: &str,
    ) -> Attempt {
        let connect_timeout = self.config.connect_timeout();

        let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(server = %addr, error = %e, "dial failed");
                return Attempt::DialFailed;
            }
            Err(_) => {
                debug!(server = %addr, "dial timed out");
                return Attempt::DialFailed;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(server = %addr, error = %e, "socket setup failed");
            return Attempt::Dropped;
        }
        self.publish_state(State::Connected, addr);

        let mut stream = stream;
        let negotiated = match timeout(connect_timeout, self.handshake(&mut stream)).await {
            Ok(Ok(timeout_ms)) => timeout_ms,
            Ok(Err(Error::SessionExpired)) => {
                // The server refused resumption: the old session and
                // everything scoped to it is gone for good.
                self.expire_session(addr);
                return Attempt::Dropped;
            }
            Ok(Err(e)) => {
                debug!(server = %addr, error = %e, "handshake failed");
                return Attempt::Dropped;
            }
            Err(_) => {
                debug!(server = %addr, "handshake timed out");
                return Attempt::Dropped;
            }
        };

        self.hosts.connected();
        self.failed_cycles = 0;
        info!(
            server = %addr,
            session_id = self.session.id,
            negotiated_timeout_ms = negotiated,
            "session established"
        );

        // The outbound queue must exist before anyone can react to the
        // HasSession event, or an early submission would fail fast.
        let (reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.handle.mux.attach(out_tx);
        self.publish_state(State::HasSession, addr);

        match self.serve(reader, writer, out_rx, addr, negotiated).await {
            Serve::Closed => Attempt::Closed,
            Serve::Lost => Attempt::Dropped,
        }
    }

    /// Send the connect handshake and adopt the server's answer. Returns the
    /// negotiated session timeout.
    async fn handshake(
        &mut self,
        stream: &mut TcpStream,
    ) -> crate::errors::Result<i32> {
        let request = ConnectRequest {
            protocol_version: 0,
            last_zxid_seen: self.session.last_zxid,
            timeout_ms: self.config.session_timeout_ms as i32,
            session_id: self.session.id,
            password: self.session.password.clone(),
        };
        let mut buf = BytesMut::new();
        request.write(&mut buf);
        write_frame(stream, &buf)
            .await
            .map_err(|e| Error::Protocol(format!("handshake write failed: {e}")))?;

        let mut frame = read_frame(stream).await?;
        let response = ConnectResponse::read(&mut frame)?;

        // A zeroed session in the reply is the server's way of refusing
        // resumption.
        if response.session_id == 0 {
            return Err(Error::SessionExpired);
        }

        let resumed = self.session.id == response.session_id;
        self.session.id = response.session_id;
        self.session.password = response.password;
        self.handle.info.store(Arc::new(SessionInfo {
            id: response.session_id,
            timeout_ms: response.timeout_ms,
        }));
        if resumed {
            debug!(session_id = self.session.id, "session resumed");
        }
        Ok(response.timeout_ms)
    }

    /// Rejected resumption: clear the session, drop its watches, resolve
    /// anything pending, and tell the world.
    fn expire_session(
        &mut self,
        addr: &str,
    ) {
        warn!(
            server = %addr,
            session_id = self.session.id,
            "session expired, a fresh one will be negotiated"
        );
        self.session = Session::default();
        self.handle.info.store(Arc::new(SessionInfo::default()));
        self.handle.registry.abort_all(|| Error::SessionExpired);
        self.handle.mux.fail_all(|| Error::SessionExpired);
        self.publish_state(State::Expired, addr);
    }

    /// Duplex phase: writer task plus inline receive loop, torn down
    /// together through a per-connection token.
    async fn serve(
        &mut self,
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        out_rx: mpsc::UnboundedReceiver<Bytes>,
        addr: &str,
        negotiated_timeout_ms: i32,
    ) -> Serve {
        let conn_cancel = self.handle.cancel.child_token();
        // Floor the interval so a degenerate negotiated timeout cannot turn
        // the keep-alive into a busy loop.
        let ping_interval =
            Duration::from_millis(negotiated_timeout_ms.max(300) as u64 / KEEPALIVE_DIVISOR as u64);
        let send_task = tokio::spawn(send_loop(
            writer,
            out_rx,
            ping_interval,
            conn_cancel.clone(),
        ));

        let end = self.recv_loop(reader, addr, negotiated_timeout_ms).await;

        conn_cancel.cancel();
        self.handle.mux.detach();
        let _ = send_task.await;
        // Everything still in flight rode on this connection.
        self.handle.mux.fail_all(|| Error::ConnectionClosed);
        end
    }

    async fn recv_loop(
        &mut self,
        mut reader: OwnedReadHalf,
        addr: &str,
        negotiated_timeout_ms: i32,
    ) -> Serve {
        // Two keep-alive intervals of silence mean the connection is gone.
        let recv_timeout = Duration::from_millis(
            negotiated_timeout_ms.max(300) as u64 * 2 / KEEPALIVE_DIVISOR as u64,
        );

        loop {
            let frame = tokio::select! {
                _ = self.handle.cancel.cancelled() => return Serve::Closed,
                frame = timeout(recv_timeout, read_frame(&mut reader)) => frame,
            };

            let mut frame = match frame {
                Err(_) => {
                    warn!(server = %addr, "no traffic within the keep-alive window");
                    return Serve::Lost;
                }
                Ok(Err(e)) => {
                    debug!(server = %addr, error = %e, "read failed");
                    return Serve::Lost;
                }
                Ok(Ok(frame)) => frame,
            };

            let header = match ReplyHeader::read(&mut frame) {
                Ok(header) => header,
                Err(e) => {
                    warn!(server = %addr, error = %e, "undecodable reply header");
                    return Serve::Lost;
                }
            };
            if header.zxid > 0 {
                self.session.last_zxid = header.zxid;
            }

            match header.xid {
                PING_XID => trace!("keep-alive acknowledged"),
                WATCH_XID => match WatcherEvent::read(&mut frame) {
                    Ok(notification) => self.deliver_notification(notification, addr),
                    Err(e) => {
                        warn!(server = %addr, error = %e, "undecodable watch notification");
                        return Serve::Lost;
                    }
                },
                _ => self.handle.mux.resolve(header, frame, &self.handle.registry),
            }
        }
    }

    fn deliver_notification(
        &self,
        notification: WatcherEvent,
        addr: &str,
    ) {
        let kind = match NotificationType::from_i32(notification.notification) {
            Ok(kind) => kind,
            Err(e) => {
                warn!(error = %e, path = %notification.path, "ignoring notification");
                return;
            }
        };
        let event = Event::watch(
            State::HasSession,
            Some(addr.to_string()),
            notification.path,
            kind,
        );
        self.handle.registry.fire(&event);
        self.handle.dispatcher.publish(event);
    }

    fn publish_state(
        &self,
        state: State,
        addr: &str,
    ) {
        self.handle
            .dispatcher
            .publish(Event::session(state, Some(addr.to_string())));
    }
}

/// Writer half: drains the outbound queue and keeps the session alive with
/// pings whenever it has been idle for a keep-alive interval.
async fn send_loop(
    mut writer: OwnedWriteHalf,
    mut out_rx: mpsc::UnboundedReceiver<Bytes>,
    ping_interval: Duration,
    cancel: CancellationToken,
) {
    let mut next_ping = Instant::now() + ping_interval;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    debug!(error = %e, "write failed");
                    cancel.cancel();
                    break;
                }
                next_ping = Instant::now() + ping_interval;
            }
            _ = sleep_until(next_ping) => {
                let mut buf = BytesMut::new();
                RequestHeader {
                    xid: PING_XID,
                    opcode: OpCode::Ping as i32,
                }
                .write(&mut buf);
                trace!("keep-alive sent");
                if let Err(e) = write_frame(&mut writer, &buf).await {
                    debug!(error = %e, "keep-alive write failed");
                    cancel.cancel();
                    break;
                }
                next_ping = Instant::now() + ping_interval;
            }
        }
    }
}
