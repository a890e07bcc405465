//! Request resolution: URI to file response.
//!
//! A finished request stream resolves to one response: the file body with
//! a 200 head carrying length, type and integrity tag, or a small
//! `text/plain` 404/400 reply. Parent-directory components are rejected
//! so requests cannot escape the serving root.

use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use quicfile_http::{file_extension, mime_type, sha256_hex, Request, Response};
use quicfile_http::CONTENT_SHA256_HEADER;

/// Value of the `Server` response header.
pub const SERVER_NAME: &str = "quicfile/0.1";

/// A fully materialized response, split into the serialized head and the
/// raw body so the sender can stream them independently.
#[derive(Debug)]
pub struct FileResponse {
    pub status: u16,
    pub head: Bytes,
    pub body: Bytes,
}

/// Turn a complete request buffer into a response.
pub fn handle_request(root: &Path, raw: &[u8]) -> FileResponse {
    let request = match Request::parse(raw) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "failed to parse request");
            return text_response(400, "Bad Request");
        }
    };

    let Some((rel, path)) = resolve_path(root, &request.uri) else {
        return text_response(404, "File not found");
    };

    info!(uri = %request.uri, path = %path.display(), "serving request");

    match std::fs::read(&path) {
        Ok(body) => ok_response(&rel, body),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "file not readable");
            text_response(404, "File not found")
        }
    }
}

/// Map a request URI under the serving root. Strips any query string and
/// refuses parent-directory traversal.
fn resolve_path(root: &Path, uri: &str) -> Option<(String, PathBuf)> {
    let rel = uri
        .trim_start_matches('/')
        .split('?')
        .next()
        .unwrap_or("")
        .to_string();

    let rel_path = PathBuf::from(&rel);
    for component in rel_path.components() {
        if matches!(component, Component::ParentDir) {
            warn!(uri, "rejecting path traversal attempt");
            return None;
        }
    }

    Some((rel, root.join(rel_path)))
}

fn ok_response(rel: &str, body: Vec<u8>) -> FileResponse {
    let digest = sha256_hex(&body);

    let mut resp = Response::new(200);
    resp.headers
        .insert("Server".to_string(), SERVER_NAME.to_string());
    let mime = file_extension(rel)
        .map(|ext| mime_type(&ext.to_ascii_lowercase()))
        .unwrap_or("application/octet-stream");
    resp.headers
        .insert("Content-Type".to_string(), mime.to_string());
    resp.headers
        .insert("Content-Length".to_string(), body.len().to_string());
    resp.headers
        .insert(CONTENT_SHA256_HEADER.to_string(), digest);

    FileResponse {
        status: 200,
        head: Bytes::from(resp.build_headers()),
        body: Bytes::from(body),
    }
}

fn text_response(status: u16, text: &'static str) -> FileResponse {
    let mut resp = Response::new(status);
    resp.headers
        .insert("Server".to_string(), SERVER_NAME.to_string());
    resp.headers
        .insert("Content-Type".to_string(), "text/plain".to_string());
    resp.headers
        .insert("Content-Length".to_string(), text.len().to_string());

    FileResponse {
        status,
        head: Bytes::from(resp.build_headers()),
        body: Bytes::from_static(text.as_bytes()),
    }
}
