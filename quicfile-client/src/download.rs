//! Download driver.
//!
//! Issues one request on the engine's default stream, reassembles the
//! response (head until CRLFCRLF, then body bytes into the output sink),
//! and verifies the advertised SHA-256 tag once the stream finishes. The
//! digest context exists only when the server advertised a tag; without
//! one, no verification runs.

use anyhow::{bail, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use quicfile_engine::{Engine, EngineEvent};
use quicfile_http::{ContentDigest, Method, Request, Response, CONTENT_SHA256_HEADER};

/// What a finished download looked like.
pub struct DownloadSummary {
    pub status: u16,
    pub bytes_received: u64,
    /// `Some(true/false)` when the server advertised a tag, `None`
    /// otherwise.
    pub verified: Option<bool>,
}

/// Request `uri` and stream the response body into `output`.
pub fn download(
    engine: &Engine,
    host: &str,
    uri: &str,
    output: &Path,
    events: &Receiver<EngineEvent>,
) -> Result<DownloadSummary> {
    let mut request = Request::default();
    request.method = Method::Get;
    request.uri = uri.to_string();
    request
        .headers
        .insert("Host".to_string(), host.to_string());
    request
        .headers
        .insert("User-Agent".to_string(), "quicfile-client/0.1".to_string());
    request.headers.insert("Accept".to_string(), "*/*".to_string());
    request
        .headers
        .insert("Connection".to_string(), "close".to_string());

    let raw = request.build();
    engine
        .write(&raw, true)
        .context("failed to send the request")?;
    info!(uri, bytes = raw.len(), "request sent");

    let mut buf = vec![0u8; 65536];
    let mut head_buf: Vec<u8> = Vec::new();
    let mut headers_done = false;
    let mut status = 0u16;
    let mut expected_tag: Option<String> = None;
    let mut digest: Option<ContentDigest> = None;
    let mut out_file: Option<File> = None;
    let mut body_bytes = 0u64;
    let mut connection_closed = false;
    let mut finished = false;

    let started = Instant::now();
    let mut last_report = started;

    while !finished {
        // Drain everything the I/O thread has buffered so far.
        let mut made_progress = false;
        loop {
            let (n, fin) = engine.read(&mut buf).context("stream read failed")?;

            if n > 0 {
                made_progress = true;
                let chunk = &buf[..n];

                if !headers_done {
                    head_buf.extend_from_slice(chunk);
                    if let Some(end) = find_header_end(&head_buf) {
                        headers_done = true;

                        let response = Response::parse(&head_buf[..end])
                            .context("failed to parse the response head")?;
                        status = response.status;
                        info!(
                            status = response.status,
                            text = %response.status_text,
                            "response head received"
                        );
                        if let Some(len) = response.headers.get("Content-Length") {
                            info!(content_length = %len, "body announced");
                        }

                        expected_tag = response.headers.get(CONTENT_SHA256_HEADER).cloned();
                        if let Some(tag) = &expected_tag {
                            debug!(tag = %tag, "integrity verification enabled");
                            digest = Some(ContentDigest::new());
                        }

                        let file = File::create(output).with_context(|| {
                            format!("failed to create output file {}", output.display())
                        })?;
                        out_file = Some(file);
                        info!(output = %output.display(), "saving body");

                        // Bytes of this chunk past CRLFCRLF are already
                        // body.
                        let body_part = head_buf.split_off(end);
                        if !body_part.is_empty() {
                            write_body(
                                &body_part,
                                &mut out_file,
                                &mut digest,
                                &mut body_bytes,
                            )?;
                        }
                        head_buf.clear();
                    }
                } else {
                    write_body(chunk, &mut out_file, &mut digest, &mut body_bytes)?;
                }
            }

            if fin {
                finished = true;
                break;
            }
            if n == 0 {
                break;
            }

            if last_report.elapsed() >= Duration::from_secs(1) {
                let elapsed = started.elapsed().as_secs_f64();
                let rate_mbps = (body_bytes as f64 * 8.0) / (1_000_000.0 * elapsed.max(1e-9));
                info!(bytes = body_bytes, rate_mbps, "downloading");
                last_report = Instant::now();
            }
        }

        if finished {
            break;
        }
        if connection_closed && !made_progress {
            bail!("connection closed before the download finished");
        }

        // Nothing buffered; wait for the I/O thread to signal activity.
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(EngineEvent::ConnectionClosed) => {
                warn!("connection closed by the transport");
                connection_closed = true;
            }
            Ok(EngineEvent::Error { message }) => bail!("engine error: {message}"),
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                connection_closed = true;
            }
        }
    }

    if !headers_done {
        bail!("stream ended before the response head completed");
    }

    if let Some(file) = out_file.as_mut() {
        file.flush().context("failed to flush output file")?;
    }
    info!(bytes = body_bytes, "download complete");

    let verified = match (digest, expected_tag) {
        (Some(digest), Some(tag)) => {
            let calculated = digest.finish_hex();
            eprintln!("=== Integrity Verification ===");
            eprintln!("  Expected SHA256:   {tag}");
            eprintln!("  Calculated SHA256: {calculated}");
            if calculated == tag {
                eprintln!("  Integrity verification PASSED");
                Some(true)
            } else {
                eprintln!("  Integrity verification FAILED");
                Some(false)
            }
        }
        _ => None,
    };

    Ok(DownloadSummary {
        status,
        bytes_received: body_bytes,
        verified,
    })
}

fn write_body(
    chunk: &[u8],
    out_file: &mut Option<File>,
    digest: &mut Option<ContentDigest>,
    body_bytes: &mut u64,
) -> Result<()> {
    if let Some(file) = out_file.as_mut() {
        file.write_all(chunk).context("failed to write output file")?;
    }
    if let Some(digest) = digest.as_mut() {
        digest.update(chunk);
    }
    *body_bytes += chunk.len() as u64;
    Ok(())
}

/// Index just past the CRLFCRLF that terminates the head, if present.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_end_detection() {
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n\r\n"), Some(19));
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n\r\nbody"), Some(19));
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\nContent-"), None);
        assert_eq!(find_header_end(b""), None);
    }

    #[test]
    fn header_end_split_across_accumulated_chunks() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"HTTP/1.1 200 OK\r\nA: b\r\n\r");
        assert_eq!(find_header_end(&buf), None);
        buf.extend_from_slice(b"\nfirst-body-bytes");
        let end = find_header_end(&buf).unwrap();
        assert_eq!(&buf[end..], b"first-body-bytes");
    }
}
