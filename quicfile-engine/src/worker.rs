//! The I/O event loop.
//!
//! One `IoWorker` runs per engine instance on a dedicated native thread
//! and is the only code that touches the `quiche::Connection`. The loop
//! blocks in `mio::Poll` with a timeout taken from the connection's
//! next-deadline clock and wakes on three events: the UDP socket turning
//! readable, the timer expiring, and the command waker firing.

use crossbeam_channel::Receiver;
use mio::net::UdpSocket;
use mio::{Events, Poll, Token};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::buffer::StreamBufferMap;
use crate::command::Command;
use crate::event::{EngineEvent, EventCallback};
use crate::stats::EngineStats;
use crate::MAX_DATAGRAM_SIZE;

pub(crate) const SOCKET_TOKEN: Token = Token(0);
pub(crate) const WAKER_TOKEN: Token = Token(1);

/// Outcome of a connection attempt, waited on by `Engine::connect`.
#[derive(Default)]
pub(crate) struct ConnectGate {
    pub complete: bool,
    pub success: bool,
}

/// State shared between the facade and its I/O thread.
pub(crate) struct Shared {
    pub gate: Mutex<ConnectGate>,
    pub cond: Condvar,
    pub stats: Mutex<EngineStats>,
    pub connected: AtomicBool,
}

impl Shared {
    pub fn new() -> Shared {
        Shared {
            gate: Mutex::new(ConnectGate::default()),
            cond: Condvar::new(),
            stats: Mutex::new(EngineStats::default()),
            connected: AtomicBool::new(false),
        }
    }
}

pub(crate) struct IoWorker {
    poll: Poll,
    socket: UdpSocket,
    local_addr: SocketAddr,
    conn: quiche::Connection,
    cmd_rx: Receiver<Command>,
    buffers: Arc<StreamBufferMap>,
    shared: Arc<Shared>,
    callback: EventCallback,
    /// Streams whose last write was rejected for lack of credit; drained
    /// into `StreamWritable` events when capacity returns.
    blocked_streams: Vec<u64>,
    established_seen: bool,
    /// Per-datagram logging at debug level (ENABLE_DEBUG_LOG).
    verbose: bool,
}

impl IoWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        poll: Poll,
        socket: UdpSocket,
        local_addr: SocketAddr,
        conn: quiche::Connection,
        cmd_rx: Receiver<Command>,
        buffers: Arc<StreamBufferMap>,
        shared: Arc<Shared>,
        callback: EventCallback,
        verbose: bool,
    ) -> IoWorker {
        IoWorker {
            poll,
            socket,
            local_addr,
            conn,
            cmd_rx,
            buffers,
            shared,
            callback,
            blocked_streams: Vec::new(),
            established_seen: false,
            verbose,
        }
    }

    pub fn run(mut self) {
        let mut events = Events::with_capacity(64);

        // Emit the Initial flight before the first wait.
        self.flush_egress();

        let mut stop = false;
        while !stop {
            let timeout = self.conn.timeout();
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                warn!(error = %e, "event loop poll failed");
                self.emit(&EngineEvent::Error {
                    message: format!("poll failed: {e}"),
                });
                break;
            }

            if events.is_empty() {
                trace!("timer expired");
                self.conn.on_timeout();
            }

            for event in events.iter() {
                match event.token() {
                    SOCKET_TOKEN => self.drain_socket(),
                    WAKER_TOKEN => stop = self.apply_commands(),
                    _ => {}
                }
            }

            self.process_readable();
            self.process_writable();
            self.flush_egress();
            self.refresh_stats();
            self.check_established();

            if self.conn.is_closed() {
                info!("connection closed");
                self.shared.connected.store(false, Ordering::Release);
                self.finish_gate(false);
                self.emit(&EngineEvent::ConnectionClosed);
                break;
            }
        }

        self.shared.connected.store(false, Ordering::Release);
        self.finish_gate(false);
        debug!("event loop exited");
    }

    /// Drain the socket until it would block, feeding every datagram to
    /// the connection.
    fn drain_socket(&mut self) {
        let mut buf = [0u8; 65535];

        loop {
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "UDP receive error");
                    break;
                }
            };

            let info = quiche::RecvInfo {
                from,
                to: self.local_addr,
            };

            match self.conn.recv(&mut buf[..len], info) {
                Ok(read) if self.verbose => debug!(bytes = read, peer = %from, "datagram processed"),
                Ok(read) => trace!(bytes = read, "datagram processed"),
                Err(e) => warn!(error = %e, "dropping undecodable datagram"),
            }
        }
    }

    /// Apply all queued commands in FIFO order. Returns true when a Stop
    /// command was seen.
    fn apply_commands(&mut self) -> bool {
        let mut stop = false;

        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                Command::Write {
                    stream_id,
                    data,
                    fin,
                } => {
                    match self.conn.stream_send(stream_id, &data, fin) {
                        Ok(sent) if sent < data.len() => {
                            debug!(
                                stream_id,
                                sent,
                                len = data.len(),
                                "partial stream write, stream blocked"
                            );
                            self.blocked_streams.push(stream_id);
                        }
                        Ok(sent) => trace!(stream_id, sent, fin, "stream write applied"),
                        Err(quiche::Error::Done) => {
                            debug!(stream_id, "stream not writable, write deferred by peer");
                            self.blocked_streams.push(stream_id);
                        }
                        Err(e) => {
                            warn!(stream_id, error = %e, "stream write failed");
                            self.emit(&EngineEvent::Error {
                                message: format!("write on stream {stream_id} failed: {e}"),
                            });
                        }
                    }
                    self.flush_egress();
                }
                Command::Close { error_code, reason } => {
                    // Err(Done) here means the connection is already
                    // closing; nothing to do.
                    let _ = self.conn.close(true, error_code, reason.as_bytes());
                    self.flush_egress();
                }
                Command::Stop => stop = true,
            }
        }

        stop
    }

    /// Move readable stream data into the per-stream buffers and notify
    /// the application.
    fn process_readable(&mut self) {
        let readable: Vec<u64> = self.conn.readable().collect();
        let mut chunk = [0u8; 65535];

        for stream_id in readable {
            let buffer = self.buffers.get_or_create(stream_id);

            loop {
                match self.conn.stream_recv(stream_id, &mut chunk) {
                    Ok((len, fin)) => {
                        buffer.append(&chunk[..len], fin);
                        trace!(stream_id, bytes = len, fin, "stream bytes buffered");
                        if fin {
                            break;
                        }
                    }
                    Err(quiche::Error::Done) => break,
                    Err(e) => {
                        warn!(stream_id, error = %e, "stream receive failed");
                        break;
                    }
                }
            }

            self.emit(&EngineEvent::StreamReadable { stream_id });
        }
    }

    /// Report streams that blocked a write and have capacity again.
    fn process_writable(&mut self) {
        if self.blocked_streams.is_empty() {
            return;
        }

        let writable: Vec<u64> = self.conn.writable().collect();
        let mut unblocked = Vec::new();
        self.blocked_streams.retain(|sid| {
            if writable.contains(sid) {
                unblocked.push(*sid);
                false
            } else {
                true
            }
        });

        for stream_id in unblocked {
            self.emit(&EngineEvent::StreamWritable { stream_id });
        }
    }

    /// Pull outgoing datagrams from the connection and put them on the
    /// wire. The poll timeout is recomputed from `Connection::timeout()`
    /// on the next loop iteration, so a `None` deadline leaves the timer
    /// disarmed.
    fn flush_egress(&mut self) {
        let mut out = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (written, send_info) = match self.conn.send(&mut out) {
                Ok(v) => v,
                Err(quiche::Error::Done) => break,
                Err(e) => {
                    warn!(error = %e, "failed to create packet");
                    let _ = self.conn.close(false, 0x1, b"fail");
                    break;
                }
            };

            match self.socket.send_to(&out[..written], send_info.to) {
                Ok(sent) if self.verbose => {
                    debug!(bytes = sent, peer = %send_info.to, "datagram sent")
                }
                Ok(sent) => trace!(bytes = sent, peer = %send_info.to, "datagram sent"),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // Dropped; the transport retransmits.
                    debug!("socket backpressure, dropping outgoing datagram");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "UDP send error");
                    break;
                }
            }
        }
    }

    fn refresh_stats(&self) {
        let s = self.conn.stats();
        let mut snap = self.shared.stats.lock();
        snap.packets_sent = s.sent as u64;
        snap.packets_received = s.recv as u64;
        snap.bytes_sent = s.sent_bytes;
        snap.bytes_received = s.recv_bytes;
        snap.packets_lost = s.lost as u64;
        if let Some(path) = self.conn.path_stats().next() {
            snap.rtt = path.rtt;
            snap.cwnd = path.cwnd as u64;
        }
    }

    /// On the first `is_established`, release a waiting `connect()` and
    /// tell the application.
    fn check_established(&mut self) {
        if self.established_seen || !self.conn.is_established() {
            return;
        }
        self.established_seen = true;
        self.shared.connected.store(true, Ordering::Release);

        {
            let mut gate = self.shared.gate.lock();
            gate.complete = true;
            gate.success = true;
            self.shared.cond.notify_all();
        }

        let alpn = String::from_utf8_lossy(self.conn.application_proto()).into_owned();
        info!(alpn = %alpn, "connection established");
        self.emit(&EngineEvent::Connected { alpn });
    }

    /// Complete the connect gate if nobody has yet; used on failure and
    /// loop exit so a waiting `connect()` always wakes.
    fn finish_gate(&self, success: bool) {
        let mut gate = self.shared.gate.lock();
        if !gate.complete {
            gate.complete = true;
            gate.success = success;
            self.shared.cond.notify_all();
        }
    }

    fn emit(&self, event: &EngineEvent) {
        (self.callback)(event);
    }
}
