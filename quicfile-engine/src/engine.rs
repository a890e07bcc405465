//! The engine facade.
//!
//! Public, thread-safe surface over one QUIC client connection. All
//! methods may be called from any thread; none of them touches the
//! protocol state directly. Writes and closes travel to the I/O thread as
//! commands, reads drain the per-stream buffers, and `connect` blocks on
//! a condition variable until the I/O thread reports the handshake
//! outcome.

use mio::net::UdpSocket;
use mio::{Interest, Poll, Waker};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::buffer::StreamBufferMap;
use crate::command::{Command, CommandBus};
use crate::config::{ConfigMap, EngineConfig};
use crate::error::{EngineError, Result};
use crate::event::{EngineEvent, EventCallback};
use crate::stats::EngineStats;
use crate::worker::{IoWorker, Shared, SOCKET_TOKEN, WAKER_TOKEN};
use crate::LOCAL_CONN_ID_LEN;

/// The hidden stream behind `write`/`read`: the first client-initiated
/// bidirectional stream.
pub const DEFAULT_STREAM_ID: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Opened,
    CallbackSet,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Thread-safe QUIC engine for a single client connection.
pub struct Engine {
    state: Mutex<State>,
    config: Mutex<Option<EngineConfig>>,
    callback: Mutex<Option<EventCallback>>,
    buffers: Arc<StreamBufferMap>,
    shared: Arc<Shared>,
    bus: Mutex<Option<CommandBus>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<String>,
    scid: Mutex<String>,
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            state: Mutex::new(State::New),
            config: Mutex::new(None),
            callback: Mutex::new(None),
            buffers: Arc::new(StreamBufferMap::new()),
            shared: Arc::new(Shared::new()),
            bus: Mutex::new(None),
            thread: Mutex::new(None),
            last_error: Mutex::new(String::new()),
            scid: Mutex::new(String::new()),
        }
    }

    /// Adopt a configuration map. Allowed before the first connect and
    /// again after `close()`; the map is validated here so later stages
    /// only see well-typed values.
    pub fn open(&self, map: ConfigMap) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            State::New | State::Closed => {}
            _ => return self.fail(EngineError::InvalidState),
        }

        let cfg = match EngineConfig::from_map(map) {
            Ok(cfg) => cfg,
            Err(e) => return self.fail(e),
        };

        *self.config.lock() = Some(cfg);
        *state = if self.callback.lock().is_some() {
            State::CallbackSet
        } else {
            State::Opened
        };
        Ok(())
    }

    /// Install the event callback. May be called in any state; the
    /// callback survives `close()` and applies to the next connection.
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        *self.callback.lock() = Some(Arc::new(callback));
        if *state == State::Opened {
            *state = State::CallbackSet;
        }
    }

    /// Connect to `host:port` and wait up to `timeout_ms` for the
    /// handshake. On success returns the 8-hex-char truncation of the
    /// connection id.
    pub fn connect(&self, host: &str, port: u16, timeout_ms: u64) -> Result<String> {
        {
            let state = self.state.lock();
            match *state {
                State::CallbackSet => {}
                State::Opened => return self.fail(EngineError::CallbackMissing),
                State::New | State::Closed => return self.fail(EngineError::NotOpened),
                _ => return self.fail(EngineError::AlreadyConnected),
            }
        }

        let config = self
            .config
            .lock()
            .clone()
            .ok_or(EngineError::NotOpened)?;
        let callback = self
            .callback
            .lock()
            .clone()
            .ok_or(EngineError::CallbackMissing)?;

        let peer = match resolve(host, port) {
            Some(addr) => addr,
            None => {
                return self.fail(EngineError::Resolve {
                    host: host.to_string(),
                    port,
                })
            }
        };

        let bind_addr = match peer {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let mut socket = match UdpSocket::bind(bind_addr) {
            Ok(s) => s,
            Err(e) => return self.fail(e.into()),
        };
        let local_addr = match socket.local_addr() {
            Ok(a) => a,
            Err(e) => return self.fail(e.into()),
        };

        let mut scid_bytes = [0u8; LOCAL_CONN_ID_LEN];
        if let Err(e) = getrandom::getrandom(&mut scid_bytes) {
            return self.fail(EngineError::Entropy(e.to_string()));
        }
        let scid = quiche::ConnectionId::from_ref(&scid_bytes);
        let scid_hex = hex::encode(&scid_bytes[..4]);

        let mut transport = match config.build_transport() {
            Ok(t) => t,
            Err(e) => return self.fail(e),
        };

        let conn = match quiche::connect(Some(host), &scid, local_addr, peer, &mut transport) {
            Ok(c) => c,
            Err(e) => return self.fail(e.into()),
        };

        let poll = match Poll::new() {
            Ok(p) => p,
            Err(e) => return self.fail(e.into()),
        };
        if let Err(e) = poll
            .registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)
        {
            return self.fail(e.into());
        }
        let waker = match Waker::new(poll.registry(), WAKER_TOKEN) {
            Ok(w) => Arc::new(w),
            Err(e) => return self.fail(e.into()),
        };

        // Fresh connection, fresh shared state.
        {
            let mut gate = self.shared.gate.lock();
            gate.complete = false;
            gate.success = false;
        }
        *self.shared.stats.lock() = EngineStats::default();
        self.buffers.clear();

        let (tx, rx) = crossbeam_channel::unbounded();
        let bus = CommandBus::new(tx, waker);

        info!(host, port, scid = %scid_hex, "connecting");
        *self.state.lock() = State::Connecting;

        let worker = IoWorker::new(
            poll,
            socket,
            local_addr,
            conn,
            rx,
            self.buffers.clone(),
            self.shared.clone(),
            callback,
            config.debug_log(),
        );
        let handle = match crate::thread::spawn_named("engine-io", move || worker.run()) {
            Ok(h) => h,
            Err(e) => {
                *self.state.lock() = State::Closed;
                return self.fail(e.into());
            }
        };

        *self.thread.lock() = Some(handle);
        *self.bus.lock() = Some(bus);
        *self.scid.lock() = scid_hex.clone();

        // Block until the I/O thread reports the handshake outcome or the
        // deadline passes.
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut timed_out = false;
        {
            let mut gate = self.shared.gate.lock();
            while !gate.complete {
                if self
                    .shared
                    .cond
                    .wait_until(&mut gate, deadline)
                    .timed_out()
                {
                    timed_out = true;
                    break;
                }
            }
            if gate.complete && gate.success {
                drop(gate);
                *self.state.lock() = State::Connected;
                debug!(scid = %scid_hex, "connect complete");
                return Ok(scid_hex);
            }
        }

        self.close(0x0, "connect failed");
        if timed_out {
            self.fail(EngineError::ConnectTimeout(timeout_ms))
        } else {
            self.fail(EngineError::ConnectFailed)
        }
    }

    /// Queue bytes on the default stream. The payload is copied into the
    /// command, so the caller's buffer is free on return.
    pub fn write(&self, data: &[u8], fin: bool) -> Result<usize> {
        if *self.state.lock() != State::Connected {
            return self.fail(EngineError::NotConnected);
        }

        let cmd = match Command::write(DEFAULT_STREAM_ID, data, fin) {
            Ok(cmd) => cmd,
            Err(e) => return self.fail(e),
        };
        let bus = self.bus.lock();
        match bus.as_ref() {
            Some(bus) => {
                if let Err(e) = bus.send(cmd) {
                    return self.fail(e);
                }
            }
            None => return self.fail(EngineError::LoopStopped),
        }
        Ok(data.len())
    }

    /// Drain up to `out.len()` bytes from the default stream's buffer.
    /// Returns `(0, fin)` when no data is waiting; never blocks.
    pub fn read(&self, out: &mut [u8]) -> Result<(usize, bool)> {
        match *self.state.lock() {
            State::Connected | State::Closing => {}
            _ => return self.fail(EngineError::NotConnected),
        }

        match self.buffers.get(DEFAULT_STREAM_ID) {
            Some(buffer) => Ok(buffer.read(out)),
            None => Ok((0, false)),
        }
    }

    /// Close the connection and stop the I/O thread. Synchronous and
    /// idempotent; after return no callback fires and later commands have
    /// no effect. Config and callback are retained for a re-open.
    pub fn close(&self, error_code: u64, reason: &str) {
        {
            let mut state = self.state.lock();
            match *state {
                State::Connecting | State::Connected => *state = State::Closing,
                _ => return,
            }
        }

        if let Some(bus) = self.bus.lock().take() {
            let _ = bus.send(Command::close(error_code, reason));
            let _ = bus.send(Command::Stop);
        }

        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }

        self.shared.connected.store(false, Ordering::Release);
        self.buffers.clear();
        *self.state.lock() = State::Closed;
        info!(error_code, reason, "engine closed");
    }

    /// Latest statistics snapshot, refreshed by the I/O thread.
    pub fn stats(&self) -> EngineStats {
        self.shared.stats.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Whether the I/O thread is alive.
    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// 8-hex-char truncation of the connection id chosen at connect time.
    pub fn scid(&self) -> String {
        self.scid.lock().clone()
    }

    /// Diagnostic string for the most recent failure.
    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    fn fail<T>(&self, err: EngineError) -> Result<T> {
        *self.last_error.lock() = err.to_string();
        Err(err)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close(0x0, "engine dropped");
    }
}

fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    (host, port).to_socket_addrs().ok()?.next()
}
