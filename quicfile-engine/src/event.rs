//! Engine events delivered to the application callback.

use std::sync::Arc;

/// Events emitted by the I/O thread.
///
/// `Connected` fires at most once per connection attempt, before any
/// `StreamReadable` for that connection. After `Engine::close` returns,
/// no further event fires.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The handshake completed; carries the negotiated application
    /// protocol.
    Connected { alpn: String },

    /// Bytes (or a FIN) arrived on a stream and are waiting in its read
    /// buffer.
    StreamReadable { stream_id: u64 },

    /// A stream that previously rejected a write has send capacity again.
    StreamWritable { stream_id: u64 },

    /// The connection is gone: idle timeout, peer close, or transport
    /// failure.
    ConnectionClosed,

    /// Asynchronous fatal condition on the I/O thread.
    Error { message: String },
}

/// Application callback invoked on the I/O thread.
///
/// Callbacks must not block; long work belongs on the application's own
/// threads.
pub type EventCallback = Arc<dyn Fn(&EngineEvent) + Send + Sync>;
