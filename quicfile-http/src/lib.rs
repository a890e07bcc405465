//! # quicfile-http: Minimal HTTP/1.1 Framing over QUIC Streams
//!
//! This crate provides the deliberately small HTTP/1.1 subset spoken on
//! quicfile request/response streams:
//!
//! - Client sends a single request head (`GET /path HTTP/1.1` plus headers)
//!   with FIN at the end of the request
//! - Server replies with a response head terminated by CRLFCRLF, then raw
//!   body bytes with FIN on the last byte
//!
//! There is no chunked transfer encoding, no header normalization and no
//! content negotiation; the codec parses and serializes exactly what the
//! wire carries. Integrity of the body is covered end-to-end by a SHA-256
//! tag travelling in the `X-Content-SHA256` header (see [`integrity`]).

pub mod codec;
pub mod error;
pub mod integrity;
pub mod mime;

pub use codec::{Method, Request, Response};
pub use error::{Error, Result};
pub use integrity::{sha256_hex, ContentDigest};
pub use mime::{file_extension, mime_type};

/// Name of the response header carrying the hex SHA-256 of the body.
pub const CONTENT_SHA256_HEADER: &str = "X-Content-SHA256";
