//! Engine error types.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error type for engine operations.
///
/// No error crosses the facade as a panic; every public operation returns
/// `Result`, and the most recent failure is additionally retained as a
/// diagnostic string reachable through `Engine::last_error`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `open()` has not been called (or the engine was closed and not
    /// re-opened).
    #[error("engine is not opened")]
    NotOpened,

    /// `connect()` requires an event callback to be installed first.
    #[error("event callback is not set")]
    CallbackMissing,

    /// The operation needs an established connection.
    #[error("engine is not connected")]
    NotConnected,

    /// The engine already has a live connection attempt or connection.
    #[error("engine is already connected or connecting")]
    AlreadyConnected,

    /// The operation is not permitted in the engine's current state.
    #[error("operation not allowed in the current engine state")]
    InvalidState,

    /// A configuration key carried a value of the wrong type.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// DNS resolution produced no usable address.
    #[error("failed to resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    /// The system entropy source failed while generating a connection id.
    #[error("entropy source failed: {0}")]
    Entropy(String),

    /// The peer did not report established within the deadline.
    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),

    /// The connection attempt failed before the deadline.
    #[error("connection attempt failed")]
    ConnectFailed,

    /// A single write exceeds the per-command payload cap.
    #[error("write of {len} bytes exceeds the {max}-byte command limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// The I/O thread is no longer accepting commands.
    #[error("engine loop has stopped")]
    LoopStopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Quic(#[from] quiche::Error),
}
