//! Commands from application threads to the I/O thread.
//!
//! Writes and closes are never applied directly by the calling thread;
//! they are queued as commands and drained on the I/O thread in FIFO
//! order. After every enqueue the producer fires the loop's waker so the
//! loop iterates even when the socket is idle.

use bytes::Bytes;
use crossbeam_channel::Sender;
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Per-command payload cap. Larger transfers are chunked by the caller.
pub const MAX_WRITE_LEN: usize = 65_536;

/// Longest close reason carried on the wire.
pub const MAX_CLOSE_REASON: usize = 255;

/// A queued operation for the I/O thread.
#[derive(Debug, Clone)]
pub enum Command {
    /// Send bytes on a stream, optionally finishing it.
    Write {
        stream_id: u64,
        data: Bytes,
        fin: bool,
    },
    /// Close the connection with an application error code and reason.
    Close { error_code: u64, reason: String },
    /// Stop the event loop.
    Stop,
}

impl Command {
    /// Build a write command, copying the payload so the caller regains
    /// ownership of its buffer immediately.
    pub fn write(stream_id: u64, data: &[u8], fin: bool) -> Result<Command> {
        if data.len() > MAX_WRITE_LEN {
            return Err(EngineError::PayloadTooLarge {
                len: data.len(),
                max: MAX_WRITE_LEN,
            });
        }
        Ok(Command::Write {
            stream_id,
            data: Bytes::copy_from_slice(data),
            fin,
        })
    }

    /// Build a close command, truncating over-long reasons.
    pub fn close(error_code: u64, reason: &str) -> Command {
        let mut reason = reason.to_string();
        if reason.len() > MAX_CLOSE_REASON {
            let mut cut = MAX_CLOSE_REASON;
            while !reason.is_char_boundary(cut) {
                cut -= 1;
            }
            reason.truncate(cut);
        }
        Command::Close { error_code, reason }
    }
}

/// Producer half of the command path: the channel sender paired with the
/// event-loop waker.
pub struct CommandBus {
    tx: Sender<Command>,
    waker: Arc<mio::Waker>,
}

impl CommandBus {
    pub fn new(tx: Sender<Command>, waker: Arc<mio::Waker>) -> CommandBus {
        CommandBus { tx, waker }
    }

    /// Enqueue a command and wake the loop. Fails once the I/O thread has
    /// dropped its receiver.
    pub fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| EngineError::LoopStopped)?;
        self.waker.wake()?;
        Ok(())
    }
}
