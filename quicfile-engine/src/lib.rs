//! # quicfile-engine: Thread-Safe QUIC Engine Facade
//!
//! This crate wraps a quiche client connection behind an event-driven
//! facade with a strict concurrency discipline:
//!
//! ## Ownership: one I/O thread per engine
//! - A dedicated native thread (`engine-io`) owns the `quiche::Connection`
//!   exclusively; every protocol call (`recv`, `send`, `stream_send`,
//!   `stream_recv`, `on_timeout`, `close`) happens on that thread
//! - Application threads never touch the connection; they interact through
//!   a command channel (writes, close) and per-stream read buffers (reads)
//!
//! ## Event loop
//! The I/O thread multiplexes three wake sources with a `mio::Poll`:
//! - UDP readable: drain datagrams and feed them to the connection
//! - Timer: the poll timeout, re-armed from `Connection::timeout()`
//! - Waker: fired by command producers so the loop iterates while idle
//!
//! ## Lifecycle
//! `open(config)` → `set_event_callback(..)` → `connect(host, port, timeout)`
//! → `write`/`read` on the default stream → `close(code, reason)`. Config
//! and callback survive `close()`, so an engine can be re-opened and
//! reconnected.

pub mod buffer;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod stats;
pub mod thread;

mod worker;

pub use buffer::{StreamBufferMap, StreamReadBuffer};
pub use command::{Command, MAX_CLOSE_REASON, MAX_WRITE_LEN};
pub use config::{ConfigKey, ConfigMap, ConfigValue, EngineConfig};
pub use engine::{Engine, DEFAULT_STREAM_ID};
pub use error::{EngineError, Result};
pub use event::{EngineEvent, EventCallback};
pub use stats::EngineStats;

/// Local connection ids are always 16 bytes.
pub const LOCAL_CONN_ID_LEN: usize = 16;

/// UDP payload ceiling for both directions (MTU target).
pub const MAX_DATAGRAM_SIZE: usize = 1350;
