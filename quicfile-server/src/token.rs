//! Address-validation tokens for stateless retry.
//!
//! A retry token binds the client's claimed source address to the
//! original destination connection id:
//!
//! ```text
//! token := "quiche" || serialized-peer-sockaddr || original-dcid
//! ```
//!
//! The peer address is serialized explicitly (family tag, IP octets,
//! big-endian port) rather than through any in-memory struct layout. The
//! token carries no cryptographic binding; it is a weak anti-spoof
//! signal, not a MAC, and its shape must not change without a
//! coordinated client change.

use std::net::SocketAddr;

/// Opaque marker prefixing every token.
const TOKEN_MARKER: &[u8] = b"quiche";

/// Serialize a socket address: 1-byte family tag, raw IP octets, port in
/// network byte order.
fn encode_sockaddr(addr: &SocketAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(19);
    match addr {
        SocketAddr::V4(v4) => {
            out.push(4);
            out.extend_from_slice(&v4.ip().octets());
        }
        SocketAddr::V6(v6) => {
            out.push(6);
            out.extend_from_slice(&v6.ip().octets());
        }
    }
    out.extend_from_slice(&addr.port().to_be_bytes());
    out
}

/// Mint a retry token for a client that presented `dcid` from `peer`.
pub fn mint_token(dcid: &quiche::ConnectionId, peer: &SocketAddr) -> Vec<u8> {
    let mut token = Vec::with_capacity(TOKEN_MARKER.len() + 19 + dcid.len());
    token.extend_from_slice(TOKEN_MARKER);
    token.extend_from_slice(&encode_sockaddr(peer));
    token.extend_from_slice(dcid);
    token
}

/// Validate a token echoed back by a client at `peer`.
///
/// Checks the marker, then the exact serialized peer address; the
/// remaining bytes are the original destination connection id. Any
/// mismatch yields `None` and the packet is dropped silently.
pub fn validate_token(peer: &SocketAddr, token: &[u8]) -> Option<quiche::ConnectionId<'static>> {
    let rest = token.strip_prefix(TOKEN_MARKER)?;

    let addr = encode_sockaddr(peer);
    let rest = rest.strip_prefix(addr.as_slice())?;

    if rest.is_empty() || rest.len() > quiche::MAX_CONN_ID_LEN {
        return None;
    }

    Some(quiche::ConnectionId::from_vec(rest.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn mint_and_validate_round_trip() {
        let peer = v4("192.0.2.7:8443");
        let dcid = quiche::ConnectionId::from_ref(&[0xAB; 16]);

        let token = mint_token(&dcid, &peer);
        let odcid = validate_token(&peer, &token).expect("token should validate");
        assert_eq!(odcid.as_ref(), &[0xAB; 16]);
    }

    #[test]
    fn round_trip_over_ipv6() {
        let peer: SocketAddr = "[2001:db8::1]:4433".parse().unwrap();
        let dcid = quiche::ConnectionId::from_ref(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let token = mint_token(&dcid, &peer);
        let odcid = validate_token(&peer, &token).expect("token should validate");
        assert_eq!(odcid.as_ref(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn wrong_marker_is_rejected() {
        let peer = v4("192.0.2.7:8443");
        let dcid = quiche::ConnectionId::from_ref(&[0xAB; 16]);

        let mut token = mint_token(&dcid, &peer);
        token[0] ^= 0xFF;
        assert!(validate_token(&peer, &token).is_none());
    }

    #[test]
    fn different_peer_address_is_rejected() {
        let dcid = quiche::ConnectionId::from_ref(&[0xAB; 16]);
        let token = mint_token(&dcid, &v4("192.0.2.7:8443"));

        // Different IP, and separately a different port.
        assert!(validate_token(&v4("192.0.2.8:8443"), &token).is_none());
        assert!(validate_token(&v4("192.0.2.7:8444"), &token).is_none());
    }

    #[test]
    fn truncated_token_is_rejected() {
        let peer = v4("192.0.2.7:8443");
        let dcid = quiche::ConnectionId::from_ref(&[0xAB; 16]);
        let token = mint_token(&dcid, &peer);

        // Cut into the address bytes so no odcid remains.
        assert!(validate_token(&peer, &token[..TOKEN_MARKER.len() + 3]).is_none());
        // Marker plus address but zero odcid bytes.
        assert!(validate_token(&peer, &token[..token.len() - 16]).is_none());
        // Empty token.
        assert!(validate_token(&peer, b"").is_none());
    }

    #[test]
    fn oversized_odcid_is_rejected() {
        let peer = v4("192.0.2.7:8443");
        let mut token = Vec::new();
        token.extend_from_slice(TOKEN_MARKER);
        token.extend_from_slice(&encode_sockaddr(&peer));
        token.extend_from_slice(&[0u8; 64]);
        assert!(validate_token(&peer, &token).is_none());
    }
}
