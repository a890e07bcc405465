//! Wire-level checks: the exact bytes the codec puts on a stream.

use quicfile_http::{Method, Request, Response, CONTENT_SHA256_HEADER};

#[test]
fn request_serializes_to_the_expected_wire_bytes() {
    let mut req = Request::default();
    req.method = Method::Get;
    req.uri = "/hello.bin".to_string();
    req.headers
        .insert("Accept".to_string(), "*/*".to_string());
    req.headers
        .insert("Connection".to_string(), "close".to_string());
    req.headers
        .insert("Host".to_string(), "localhost".to_string());

    // Headers follow map (key) order; the head ends with CRLFCRLF.
    let expected = "GET /hello.bin HTTP/1.1\r\n\
                    Accept: */*\r\n\
                    Connection: close\r\n\
                    Host: localhost\r\n\
                    \r\n";
    assert_eq!(req.build(), expected.as_bytes());
}

#[test]
fn response_head_serializes_to_the_expected_wire_bytes() {
    let mut resp = Response::new(200);
    resp.headers
        .insert("Content-Length".to_string(), "1048576".to_string());
    resp.headers
        .insert("Content-Type".to_string(), "application/octet-stream".to_string());
    resp.headers
        .insert("Server".to_string(), "quicfile/0.1".to_string());

    let expected = "HTTP/1.1 200 OK\r\n\
                    Content-Length: 1048576\r\n\
                    Content-Type: application/octet-stream\r\n\
                    Server: quicfile/0.1\r\n\
                    \r\n";
    assert_eq!(resp.build_headers(), expected.as_bytes());
}

#[test]
fn advertised_digest_survives_a_round_trip() {
    let tag = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    let mut resp = Response::new(200);
    resp.headers
        .insert(CONTENT_SHA256_HEADER.to_string(), tag.to_string());

    let parsed = Response::parse(&resp.build_headers()).unwrap();
    assert_eq!(
        parsed.headers.get(CONTENT_SHA256_HEADER).map(String::as_str),
        Some(tag)
    );
}

#[test]
fn body_bytes_past_the_blank_line_are_preserved_verbatim() {
    let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 14\r\n\r\nFile not found";
    let resp = Response::parse(raw).unwrap();
    assert_eq!(resp.status, 404);
    assert_eq!(resp.body, b"File not found");
    assert_eq!(resp.body.len(), 14);
}
