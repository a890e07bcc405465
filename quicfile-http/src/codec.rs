//! Request and response head parsing/serialization.
//!
//! The codec does no validation beyond field presence: header names keep
//! the case the peer supplied, values keep everything after the optional
//! whitespace following the colon, and an unrecognized method token maps
//! to [`Method::Unknown`] rather than an error.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// HTTP request methods understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Delete,
    Unknown,
}

impl Method {
    fn from_token(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "HEAD" => Method::Head,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            _ => Method::Unknown,
        }
    }

    /// Wire token for this method. `Unknown` serializes as `GET`, matching
    /// the lenient round-trip of the original protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get | Method::Unknown => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// An HTTP/1.1 request head plus any body bytes that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Raw request target, not percent-decoded.
    pub uri: String,
    pub version: String,
    /// Header map, iterated in key order when serializing.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::Get,
            uri: String::new(),
            version: "HTTP/1.1".to_string(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }
}

impl Request {
    /// Parse a request from raw stream bytes.
    ///
    /// Reads the request line `METHOD SP URI SP VERSION`, then header lines
    /// until an empty line; everything after the empty line becomes the
    /// body. Fails only when the request line is absent or short a token.
    pub fn parse(input: &[u8]) -> Result<Request> {
        let mut pos = 0;

        let line = next_line(input, &mut pos)
            .ok_or_else(|| Error::MalformedRequestLine(String::new()))?;
        let line = std::str::from_utf8(line).map_err(|_| Error::InvalidEncoding)?;

        let mut tokens = line.split_whitespace();
        let (method, uri, version) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(m), Some(u), Some(v)) => (Method::from_token(m), u, v),
            _ => return Err(Error::MalformedRequestLine(line.to_string())),
        };

        let headers = parse_headers(input, &mut pos)?;

        Ok(Request {
            method,
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
            body: input[pos..].to_vec(),
        })
    }

    /// Serialize the request: request line, headers in map order, blank
    /// line, body.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.uri.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.version.as_bytes());
        out.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// An HTTP/1.1 response head. The body field is used by small literal
/// replies (404, 400); file bodies are streamed by the sender and never
/// pass through [`Response::build_headers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    /// Create a response with the phrase derived from the status code.
    pub fn new(status: u16) -> Response {
        Response {
            version: "HTTP/1.1".to_string(),
            status,
            status_text: status_text(status).to_string(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Parse a response head: `HTTP/1.1 200 OK` style status line followed
    /// by header lines up to the empty line.
    pub fn parse(input: &[u8]) -> Result<Response> {
        let mut pos = 0;

        let line = next_line(input, &mut pos)
            .ok_or_else(|| Error::MalformedStatusLine(String::new()))?;
        let line = std::str::from_utf8(line).map_err(|_| Error::InvalidEncoding)?;

        let mut tokens = line.splitn(3, ' ');
        let version = tokens
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::MalformedStatusLine(line.to_string()))?;
        let status: u16 = tokens
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| Error::MalformedStatusLine(line.to_string()))?;
        let status_text = tokens.next().unwrap_or("").trim_start().to_string();

        let headers = parse_headers(input, &mut pos)?;

        Ok(Response {
            version: version.to_string(),
            status,
            status_text,
            headers,
            body: input[pos..].to_vec(),
        })
    }

    /// Serialize the head only: status line, headers in map order, blank
    /// line. The body is intentionally excluded.
    pub fn build_headers(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(self.version.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status_text.as_bytes());
        out.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"\r\n");
        out
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Return the next line (without its terminator) and advance `pos` past
/// it. Accepts both CRLF and bare LF; a trailing CR is stripped.
fn next_line<'a>(input: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    if *pos >= input.len() {
        return None;
    }

    let rest = &input[*pos..];
    let (line, advance) = match rest.iter().position(|&b| b == b'\n') {
        Some(nl) => (&rest[..nl], nl + 1),
        None => (rest, rest.len()),
    };
    *pos += advance;

    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

/// Parse `Name: value` lines until the empty line that ends the head.
/// Lines without a colon are skipped, matching the original's tolerance.
fn parse_headers(input: &[u8], pos: &mut usize) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();

    while let Some(line) = next_line(input, pos) {
        if line.is_empty() {
            break;
        }

        let line = std::str::from_utf8(line).map_err(|_| Error::InvalidEncoding)?;
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(
                name.to_string(),
                value.trim_start_matches([' ', '\t']).to_string(),
            );
        }
    }

    Ok(headers)
}
