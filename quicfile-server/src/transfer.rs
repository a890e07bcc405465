//! Backpressure-aware stream sends.
//!
//! A response leaves as a single head write followed by 8 KiB body chunks
//! with FIN on the last one. The transport may accept fewer bytes than
//! offered, or none at all, when per-stream flow-control credit runs out;
//! in that case the unsent remainder is parked as a [`PendingTransfer`]
//! and resumed when the stream turns writable again.
//!
//! The controller is written against the narrow [`StreamSink`] seam so
//! the partial/blocked/error paths are exercised with scripted sinks in
//! tests.

use bytes::Bytes;
use tracing::{debug, trace, warn};

/// Body chunk size for stream sends.
pub const CHUNK_SIZE: usize = 8192;

/// The subset of the transport the send controller needs.
pub trait StreamSink {
    /// Offer bytes on a stream. Returns the number of bytes accepted,
    /// `Err(Done)` when the stream has no credit, or another error on
    /// stream failure. The FIN flag takes effect only when the final
    /// offered byte is accepted.
    fn stream_send(&mut self, stream_id: u64, data: &[u8], fin: bool) -> quiche::Result<usize>;
}

impl StreamSink for quiche::Connection {
    fn stream_send(&mut self, stream_id: u64, data: &[u8], fin: bool) -> quiche::Result<usize> {
        quiche::Connection::stream_send(self, stream_id, data, fin)
    }
}

/// Progress of a (resumed) send.
#[derive(Debug, PartialEq, Eq)]
pub enum SendProgress {
    /// Every byte was accepted; the FIN went out on the last chunk.
    Complete,
    /// Credit ran out; retry on the next writable notification.
    Blocked,
    /// The stream failed; the transfer must be dropped.
    Failed,
}

/// Outcome of starting a response send.
#[derive(Debug)]
pub enum StartOutcome {
    /// Head and body were fully accepted.
    Sent,
    /// The remainder is parked and must be resumed on writability.
    Parked(PendingTransfer),
    /// The stream failed mid-send; the response is abandoned. No error
    /// reply is possible, the stream is already mid-body.
    Failed,
}

/// A parked server-side send awaiting future writability on its stream.
///
/// The payload buffer is moved in at parking time, never copied, and is
/// freed when the transfer completes or fails.
#[derive(Debug)]
pub struct PendingTransfer {
    stream_id: u64,
    /// Unsent payload: the body, preceded by any head bytes the transport
    /// did not accept. FIN belongs to the last byte.
    data: Bytes,
    /// Next byte to send.
    offset: usize,
    total_size: usize,
    headers_sent: bool,
}

impl PendingTransfer {
    fn new(stream_id: u64, data: Bytes, offset: usize, headers_sent: bool) -> PendingTransfer {
        let total_size = data.len();
        PendingTransfer {
            stream_id,
            data,
            offset,
            total_size,
            headers_sent,
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Push remaining chunks until done or blocked.
    pub fn continue_send<S: StreamSink>(&mut self, sink: &mut S) -> SendProgress {
        while self.offset < self.total_size {
            let remaining = self.total_size - self.offset;
            let chunk = remaining.min(CHUNK_SIZE);
            let fin = self.offset + chunk >= self.total_size;

            match sink.stream_send(
                self.stream_id,
                &self.data[self.offset..self.offset + chunk],
                fin,
            ) {
                Ok(sent) => {
                    self.offset += sent;
                    trace!(
                        stream_id = self.stream_id,
                        sent,
                        offset = self.offset,
                        total = self.total_size,
                        "transfer chunk sent"
                    );
                    if sent < chunk {
                        debug!(
                            stream_id = self.stream_id,
                            offset = self.offset,
                            total = self.total_size,
                            "partial chunk accepted, stream blocked"
                        );
                        return SendProgress::Blocked;
                    }
                }
                Err(quiche::Error::Done) => {
                    debug!(
                        stream_id = self.stream_id,
                        offset = self.offset,
                        total = self.total_size,
                        "stream not writable, transfer parked"
                    );
                    return SendProgress::Blocked;
                }
                Err(e) => {
                    warn!(stream_id = self.stream_id, error = %e, "transfer send failed");
                    return SendProgress::Failed;
                }
            }
        }

        debug!(
            stream_id = self.stream_id,
            total = self.total_size,
            "transfer complete"
        );
        SendProgress::Complete
    }
}

/// Send a response head and body on a stream.
///
/// The head goes out in one non-final write (final when the body is
/// empty, so a zero-length body still carries exactly one FIN). The body
/// follows in [`CHUNK_SIZE`] chunks. When credit runs out the unsent
/// remainder moves into a [`PendingTransfer`] without copying.
pub fn start_send<S: StreamSink>(
    sink: &mut S,
    stream_id: u64,
    head: Bytes,
    body: Bytes,
) -> StartOutcome {
    let head_fin = body.is_empty();

    match sink.stream_send(stream_id, &head, head_fin) {
        Ok(sent) if sent == head.len() => {}
        Ok(sent) => {
            // The transport took only part of the head; park the tail
            // together with the body so the byte stream stays intact.
            debug!(stream_id, sent, head_len = head.len(), "partial head write");
            let mut rest = Vec::with_capacity(head.len() - sent + body.len());
            rest.extend_from_slice(&head[sent..]);
            rest.extend_from_slice(&body);
            return StartOutcome::Parked(PendingTransfer::new(
                stream_id,
                Bytes::from(rest),
                0,
                false,
            ));
        }
        Err(quiche::Error::Done) => {
            debug!(stream_id, "no credit for head write");
            let mut rest = Vec::with_capacity(head.len() + body.len());
            rest.extend_from_slice(&head);
            rest.extend_from_slice(&body);
            return StartOutcome::Parked(PendingTransfer::new(
                stream_id,
                Bytes::from(rest),
                0,
                false,
            ));
        }
        Err(e) => {
            warn!(stream_id, error = %e, "head write failed");
            return StartOutcome::Failed;
        }
    }

    if body.is_empty() {
        return StartOutcome::Sent;
    }

    // Ownership of the body moves into the transfer; on the happy path it
    // is dropped right here when the send completes.
    let mut transfer = PendingTransfer::new(stream_id, body, 0, true);
    match transfer.continue_send(sink) {
        SendProgress::Complete => StartOutcome::Sent,
        SendProgress::Blocked => StartOutcome::Parked(transfer),
        SendProgress::Failed => StartOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// What the scripted sink should do with the next `stream_send`.
    enum Step {
        /// Accept at most this many bytes.
        Accept(usize),
        /// Report no credit.
        Done,
        /// Fail the stream.
        Error,
    }

    struct ScriptedSink {
        script: VecDeque<Step>,
        /// (bytes, fin-applied) per accepted write.
        accepted: Vec<(Vec<u8>, bool)>,
    }

    impl ScriptedSink {
        fn new(script: Vec<Step>) -> ScriptedSink {
            ScriptedSink {
                script: script.into(),
                accepted: Vec::new(),
            }
        }

        /// A sink that accepts everything offered.
        fn open() -> ScriptedSink {
            ScriptedSink::new(vec![])
        }

        fn accepted_bytes(&self) -> Vec<u8> {
            self.accepted.iter().flat_map(|(b, _)| b.clone()).collect()
        }

        fn fin_count(&self) -> usize {
            self.accepted.iter().filter(|(_, fin)| *fin).count()
        }
    }

    impl StreamSink for ScriptedSink {
        fn stream_send(&mut self, _sid: u64, data: &[u8], fin: bool) -> quiche::Result<usize> {
            match self.script.pop_front().unwrap_or(Step::Accept(usize::MAX)) {
                Step::Accept(max) => {
                    let n = data.len().min(max);
                    // FIN takes effect only when the whole offer lands.
                    self.accepted.push((data[..n].to_vec(), fin && n == data.len()));
                    Ok(n)
                }
                Step::Done => Err(quiche::Error::Done),
                Step::Error => Err(quiche::Error::InvalidStreamState(0)),
            }
        }
    }

    fn head() -> Bytes {
        Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 20000\r\n\r\n")
    }

    fn body(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn open_sink_takes_everything_with_one_trailing_fin() {
        let mut sink = ScriptedSink::open();
        let b = body(20_000);

        let outcome = start_send(&mut sink, 4, head(), b.clone());
        assert!(matches!(outcome, StartOutcome::Sent));

        // Head, then ceil(20000/8192) chunks.
        assert_eq!(sink.accepted.len(), 1 + 3);
        assert_eq!(sink.fin_count(), 1);
        assert!(sink.accepted.last().unwrap().1, "FIN must be on the last chunk");

        let mut expected = head().to_vec();
        expected.extend_from_slice(&b);
        assert_eq!(sink.accepted_bytes(), expected);
    }

    #[test]
    fn empty_body_sends_fin_with_the_head() {
        let mut sink = ScriptedSink::open();

        let outcome = start_send(&mut sink, 4, head(), Bytes::new());
        assert!(matches!(outcome, StartOutcome::Sent));
        assert_eq!(sink.accepted.len(), 1);
        assert!(sink.accepted[0].1);
    }

    #[test]
    fn done_mid_body_parks_with_correct_offset() {
        // Head accepted, first chunk accepted, then out of credit.
        let mut sink = ScriptedSink::new(vec![
            Step::Accept(usize::MAX),
            Step::Accept(usize::MAX),
            Step::Done,
        ]);
        let b = body(20_000);

        let transfer = match start_send(&mut sink, 4, head(), b.clone()) {
            StartOutcome::Parked(t) => t,
            other => panic!("expected a parked transfer, got {other:?}"),
        };

        assert!(transfer.headers_sent());
        assert_eq!(transfer.offset(), CHUNK_SIZE);
        assert_eq!(transfer.total_size(), b.len());
        assert!(transfer.offset() <= transfer.total_size());
        assert_eq!(sink.fin_count(), 0, "no FIN may leave before the last chunk");
    }

    #[test]
    fn partial_chunk_parks_and_resumes_where_it_stopped() {
        let mut sink = ScriptedSink::new(vec![
            Step::Accept(usize::MAX), // head
            Step::Accept(1000),       // partial first chunk
        ]);
        let b = body(20_000);

        let mut transfer = match start_send(&mut sink, 4, head(), b.clone()) {
            StartOutcome::Parked(t) => t,
            other => panic!("expected a parked transfer, got {other:?}"),
        };
        assert_eq!(transfer.offset(), 1000);

        // Credit returns; everything drains.
        assert_eq!(transfer.continue_send(&mut sink), SendProgress::Complete);
        assert_eq!(transfer.offset(), transfer.total_size());
        assert_eq!(sink.fin_count(), 1);
        assert!(sink.accepted.last().unwrap().1);

        let mut expected = head().to_vec();
        expected.extend_from_slice(&b);
        assert_eq!(sink.accepted_bytes(), expected);
    }

    #[test]
    fn repeated_blocking_eventually_delivers_every_byte_once() {
        let b = body(50_000);
        let mut sink = ScriptedSink::new(vec![
            Step::Accept(usize::MAX), // head
            Step::Accept(4096),
            Step::Done,
            Step::Accept(8192),
            Step::Accept(100),
            Step::Done,
        ]);

        let mut transfer = match start_send(&mut sink, 8, head(), b.clone()) {
            StartOutcome::Parked(t) => t,
            other => panic!("expected a parked transfer, got {other:?}"),
        };

        let mut rounds = 0;
        loop {
            match transfer.continue_send(&mut sink) {
                SendProgress::Complete => break,
                SendProgress::Blocked => rounds += 1,
                SendProgress::Failed => panic!("unexpected failure"),
            }
            assert!(rounds < 100, "transfer did not converge");
        }

        let mut expected = head().to_vec();
        expected.extend_from_slice(&b);
        assert_eq!(sink.accepted_bytes(), expected, "no gaps, no duplicates");
        assert_eq!(sink.fin_count(), 1);
    }

    #[test]
    fn stream_error_fails_the_transfer() {
        let mut sink = ScriptedSink::new(vec![Step::Accept(usize::MAX), Step::Error]);
        assert!(matches!(
            start_send(&mut sink, 4, head(), body(100)),
            StartOutcome::Failed
        ));

        // And mid-continuation as well.
        let mut sink = ScriptedSink::new(vec![Step::Accept(usize::MAX), Step::Done]);
        let mut transfer = match start_send(&mut sink, 4, head(), body(20_000)) {
            StartOutcome::Parked(t) => t,
            other => panic!("expected a parked transfer, got {other:?}"),
        };
        let mut sink = ScriptedSink::new(vec![Step::Error]);
        assert_eq!(transfer.continue_send(&mut sink), SendProgress::Failed);
    }

    #[test]
    fn blocked_head_is_parked_and_replayed_before_the_body() {
        let mut sink = ScriptedSink::new(vec![Step::Done]);
        let b = body(10_000);

        let mut transfer = match start_send(&mut sink, 4, head(), b.clone()) {
            StartOutcome::Parked(t) => t,
            other => panic!("expected a parked transfer, got {other:?}"),
        };
        assert!(!transfer.headers_sent());
        assert_eq!(transfer.offset(), 0);
        assert_eq!(transfer.total_size(), head().len() + b.len());

        let mut sink = ScriptedSink::open();
        assert_eq!(transfer.continue_send(&mut sink), SendProgress::Complete);

        let mut expected = head().to_vec();
        expected.extend_from_slice(&b);
        assert_eq!(sink.accepted_bytes(), expected);
        assert_eq!(sink.fin_count(), 1);
    }
}
