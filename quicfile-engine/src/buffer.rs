//! Per-stream read buffers.
//!
//! The I/O thread is the only appender; any application thread may drain.
//! The map-level mutex covers lookup and creation, each buffer's own
//! mutex covers append versus drain, so a reader on one stream never
//! contends with an append on another.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Consumed-prefix size at which compaction becomes worthwhile.
const COMPACT_FLOOR: usize = 64 * 1024;

#[derive(Default)]
struct BufferInner {
    data: Vec<u8>,
    read_offset: usize,
    fin_received: bool,
}

/// Byte buffer for one stream's incoming data.
pub struct StreamReadBuffer {
    inner: Mutex<BufferInner>,
}

impl StreamReadBuffer {
    pub fn new() -> StreamReadBuffer {
        StreamReadBuffer {
            inner: Mutex::new(BufferInner::default()),
        }
    }

    /// Append bytes received from the transport. I/O thread only.
    pub fn append(&self, chunk: &[u8], fin: bool) {
        let mut b = self.inner.lock();
        b.data.extend_from_slice(chunk);
        if fin {
            b.fin_received = true;
        }
    }

    /// Drain up to `out.len()` bytes. Returns the byte count and whether
    /// the reader has now observed end-of-stream (FIN received and all
    /// bytes consumed). Never blocks; an empty buffer reads as
    /// `(0, fin_received)`.
    pub fn read(&self, out: &mut [u8]) -> (usize, bool) {
        let mut b = self.inner.lock();

        let available = b.data.len() - b.read_offset;
        if available == 0 {
            return (0, b.fin_received);
        }

        let n = available.min(out.len());
        let start = b.read_offset;
        out[..n].copy_from_slice(&b.data[start..start + n]);
        b.read_offset += n;

        let fin = b.fin_received && b.read_offset == b.data.len();

        // Drop the consumed prefix once it dominates the allocation.
        if b.read_offset >= COMPACT_FLOOR && b.read_offset * 2 >= b.data.len() {
            let offset = b.read_offset;
            b.data.drain(..offset);
            b.read_offset = 0;
        }

        (n, fin)
    }

    /// Bytes currently waiting to be drained.
    pub fn pending(&self) -> usize {
        let b = self.inner.lock();
        b.data.len() - b.read_offset
    }
}

impl Default for StreamReadBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Map from stream id to its read buffer.
pub struct StreamBufferMap {
    streams: Mutex<HashMap<u64, Arc<StreamReadBuffer>>>,
}

impl StreamBufferMap {
    pub fn new() -> StreamBufferMap {
        StreamBufferMap {
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Buffer for a stream, lazily created on first readability.
    pub fn get_or_create(&self, stream_id: u64) -> Arc<StreamReadBuffer> {
        let mut streams = self.streams.lock();
        streams
            .entry(stream_id)
            .or_insert_with(|| Arc::new(StreamReadBuffer::new()))
            .clone()
    }

    pub fn get(&self, stream_id: u64) -> Option<Arc<StreamReadBuffer>> {
        self.streams.lock().get(&stream_id).cloned()
    }

    /// Drop all buffers; they live and die with the connection.
    pub fn clear(&self) {
        self.streams.lock().clear();
    }
}

impl Default for StreamBufferMap {
    fn default() -> Self {
        Self::new()
    }
}
