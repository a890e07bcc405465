//! Server dispatcher.
//!
//! One mio-driven loop owns the UDP socket, the transport config and the
//! connection table; every protocol handle is touched only here. Ingress
//! datagrams are routed by destination connection id; first-flight
//! packets from unknown peers go through version negotiation and
//! stateless retry before a connection record is created.

use anyhow::{Context, Result};
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

use quicfile_engine::config::APPLICATION_PROTOS;
use quicfile_engine::{LOCAL_CONN_ID_LEN, MAX_DATAGRAM_SIZE};

use crate::files;
use crate::token::{mint_token, validate_token};
use crate::transfer::{self, PendingTransfer, SendProgress, StartOutcome};

const SOCKET_TOKEN: Token = Token(0);

/// Per-stream request accumulation cap.
const MAX_REQUEST_LEN: usize = 8192;

/// Bind-time options.
pub struct ServerOptions {
    pub bind: SocketAddr,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub root: PathBuf,
}

/// Per-connection record.
struct ConnIo {
    conn: quiche::Connection,
    /// Request bytes accumulated per stream until its FIN.
    partial_requests: HashMap<u64, Vec<u8>>,
    /// Parked sends keyed by stream id; at most one per stream.
    transfers: HashMap<u64, PendingTransfer>,
}

pub struct Server {
    poll: Poll,
    socket: UdpSocket,
    local_addr: SocketAddr,
    config: quiche::Config,
    conns: HashMap<quiche::ConnectionId<'static>, ConnIo>,
    root: PathBuf,
}

impl Server {
    pub fn bind(opts: ServerOptions) -> Result<Server> {
        let mut socket = UdpSocket::bind(opts.bind)
            .with_context(|| format!("failed to bind UDP socket on {}", opts.bind))?;
        let local_addr = socket.local_addr()?;

        let poll = Poll::new().context("failed to create poll instance")?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)
            .context("failed to register UDP socket")?;

        let config = build_transport_config(&opts)?;

        info!(addr = %local_addr, root = %opts.root.display(), "server listening");

        Ok(Server {
            poll,
            socket,
            local_addr,
            config,
            conns: HashMap::new(),
            root: opts.root,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);

        loop {
            // The timer is the earliest deadline across all connections;
            // no deadline anywhere leaves the poll unbounded.
            let timeout = self.conns.values().filter_map(|c| c.conn.timeout()).min();

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e).context("event loop poll failed");
            }

            if events.is_empty() {
                trace!("timer fired");
                for conn_io in self.conns.values_mut() {
                    conn_io.conn.on_timeout();
                }
            } else {
                self.drain_socket();
            }

            self.flush_egress();
            self.sweep_closed();
        }
    }

    /// Drain the socket until it would block, dispatching each datagram
    /// to its connection (creating one for validated first flights).
    fn drain_socket(&mut self) {
        let Server {
            socket,
            local_addr,
            config,
            conns,
            root,
            ..
        } = self;

        let mut buf = [0u8; 65535];
        let mut out = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "UDP receive error");
                    break;
                }
            };

            let hdr = match quiche::Header::from_slice(&mut buf[..len], LOCAL_CONN_ID_LEN) {
                Ok(h) => h,
                Err(e) => {
                    warn!(error = %e, "failed to parse packet header");
                    continue;
                }
            };
            trace!(ty = ?hdr.ty, version = hdr.version, "datagram received");

            let dcid = hdr.dcid.clone().into_owned();

            if !conns.contains_key(&dcid) {
                if hdr.ty != quiche::Type::Initial {
                    debug!(dcid = ?dcid, "packet for unknown connection, dropping");
                    continue;
                }

                if !quiche::version_is_supported(hdr.version) {
                    info!(version = hdr.version, "version negotiation");
                    match quiche::negotiate_version(&hdr.scid, &hdr.dcid, &mut out) {
                        Ok(n) => send_datagram(socket, &out[..n], from),
                        Err(e) => warn!(error = %e, "failed to create version negotiation packet"),
                    }
                    continue;
                }

                let token = hdr.token.as_deref().unwrap_or_default();

                if token.is_empty() {
                    info!(peer = %from, "stateless retry");

                    let mut scid = [0u8; LOCAL_CONN_ID_LEN];
                    if let Err(e) = getrandom::getrandom(&mut scid) {
                        warn!(error = %e, "failed to generate connection id");
                        continue;
                    }
                    let new_scid = quiche::ConnectionId::from_ref(&scid);

                    let token = mint_token(&hdr.dcid, &from);
                    match quiche::retry(
                        &hdr.scid,
                        &hdr.dcid,
                        &new_scid,
                        &token,
                        hdr.version,
                        &mut out,
                    ) {
                        Ok(n) => send_datagram(socket, &out[..n], from),
                        Err(e) => warn!(error = %e, "failed to create retry packet"),
                    }
                    continue;
                }

                // Invalid tokens are dropped silently; a valid one yields
                // the original destination id the retry was bound to.
                let Some(odcid) = validate_token(&from, token) else {
                    warn!(peer = %from, "invalid address validation token");
                    continue;
                };

                // The client echoes the id minted during retry as its
                // destination id; that id becomes our local id.
                let scid = hdr.dcid.clone().into_owned();
                let conn = match quiche::accept(&scid, Some(&odcid), *local_addr, from, config) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                info!(peer = %from, scid = ?scid, "new connection");
                conns.insert(
                    scid,
                    ConnIo {
                        conn,
                        partial_requests: HashMap::new(),
                        transfers: HashMap::new(),
                    },
                );
            }

            let Some(conn_io) = conns.get_mut(&dcid) else {
                continue;
            };

            let info = quiche::RecvInfo {
                from,
                to: *local_addr,
            };
            match conn_io.conn.recv(&mut buf[..len], info) {
                Ok(read) => trace!(bytes = read, "datagram processed"),
                Err(e) => {
                    warn!(error = %e, "failed to process packet");
                    continue;
                }
            }

            if conn_io.conn.is_established() {
                process_streams(conn_io, root);
            }
        }
    }

    /// Drain every connection's egress packets onto the wire.
    fn flush_egress(&mut self) {
        let Server { socket, conns, .. } = self;
        let mut out = [0u8; MAX_DATAGRAM_SIZE];

        for conn_io in conns.values_mut() {
            loop {
                let (written, send_info) = match conn_io.conn.send(&mut out) {
                    Ok(v) => v,
                    Err(quiche::Error::Done) => break,
                    Err(e) => {
                        warn!(error = %e, "failed to create packet");
                        let _ = conn_io.conn.close(false, 0x1, b"fail");
                        break;
                    }
                };
                send_datagram(socket, &out[..written], send_info.to);
            }
        }
    }

    /// Remove connections the transport reports closed, logging their
    /// final statistics.
    fn sweep_closed(&mut self) {
        self.conns.retain(|cid, conn_io| {
            if !conn_io.conn.is_closed() {
                return true;
            }

            let stats = conn_io.conn.stats();
            let (rtt, cwnd) = conn_io
                .conn
                .path_stats()
                .next()
                .map(|p| (p.rtt, p.cwnd))
                .unwrap_or_default();
            info!(
                cid = ?cid,
                recv = stats.recv,
                sent = stats.sent,
                lost = stats.lost,
                rtt = ?rtt,
                cwnd,
                "connection closed"
            );
            false
        });
    }
}

/// Readable streams accumulate request bytes and dispatch on FIN;
/// writable streams resume their parked transfers.
fn process_streams(conn_io: &mut ConnIo, root: &Path) {
    let mut chunk = [0u8; 65535];

    for stream_id in conn_io.conn.readable().collect::<Vec<_>>() {
        trace!(stream_id, "stream readable");

        let mut finished = false;
        loop {
            match conn_io.conn.stream_recv(stream_id, &mut chunk) {
                Ok((len, fin)) => {
                    let request = conn_io.partial_requests.entry(stream_id).or_default();
                    if request.len() + len <= MAX_REQUEST_LEN {
                        request.extend_from_slice(&chunk[..len]);
                    } else {
                        warn!(stream_id, "request buffer full, discarding excess");
                    }
                    if fin {
                        finished = true;
                        break;
                    }
                }
                Err(quiche::Error::Done) => break,
                Err(e) => {
                    warn!(stream_id, error = %e, "stream receive failed");
                    break;
                }
            }
        }

        if !finished {
            continue;
        }

        let request = conn_io
            .partial_requests
            .remove(&stream_id)
            .unwrap_or_default();
        if request.is_empty() {
            continue;
        }

        let response = files::handle_request(root, &request);
        debug!(
            stream_id,
            status = response.status,
            body_len = response.body.len(),
            "response ready"
        );

        match transfer::start_send(&mut conn_io.conn, stream_id, response.head, response.body) {
            StartOutcome::Sent => {}
            StartOutcome::Parked(t) => {
                debug!(
                    stream_id,
                    offset = t.offset(),
                    total = t.total_size(),
                    "transfer parked"
                );
                conn_io.transfers.insert(stream_id, t);
            }
            StartOutcome::Failed => warn!(stream_id, "response send failed"),
        }
    }

    for stream_id in conn_io.conn.writable().collect::<Vec<_>>() {
        let Some(mut transfer) = conn_io.transfers.remove(&stream_id) else {
            continue;
        };
        trace!(stream_id, "stream writable, continuing transfer");

        match transfer.continue_send(&mut conn_io.conn) {
            SendProgress::Complete => {
                info!(stream_id, total = transfer.total_size(), "transfer complete")
            }
            SendProgress::Blocked => {
                conn_io.transfers.insert(stream_id, transfer);
            }
            SendProgress::Failed => warn!(stream_id, "transfer failed, dropping"),
        }
    }
}

fn send_datagram(socket: &UdpSocket, buf: &[u8], to: SocketAddr) {
    match socket.send_to(buf, to) {
        Ok(sent) => trace!(bytes = sent, peer = %to, "datagram sent"),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            // Dropped; the transport retransmits.
            debug!(peer = %to, "socket backpressure, dropping datagram")
        }
        Err(e) => warn!(error = %e, peer = %to, "UDP send error"),
    }
}

fn build_transport_config(opts: &ServerOptions) -> Result<quiche::Config> {
    let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION)
        .context("failed to create transport config")?;

    let cert = opts
        .cert
        .to_str()
        .context("certificate path is not valid UTF-8")?;
    let key = opts.key.to_str().context("key path is not valid UTF-8")?;

    config
        .load_cert_chain_from_pem_file(cert)
        .with_context(|| format!("failed to load certificate chain from {cert}"))?;
    config
        .load_priv_key_from_pem_file(key)
        .with_context(|| format!("failed to load private key from {key}"))?;

    config
        .set_application_protos(APPLICATION_PROTOS)
        .context("failed to set application protocols")?;

    config.set_max_idle_timeout(30_000);
    config.set_max_recv_udp_payload_size(MAX_DATAGRAM_SIZE);
    config.set_max_send_udp_payload_size(MAX_DATAGRAM_SIZE);
    config.set_initial_max_data(100_000_000);
    config.set_initial_max_stream_data_bidi_local(50_000_000);
    config.set_initial_max_stream_data_bidi_remote(50_000_000);
    config.set_initial_max_streams_bidi(100);
    config.set_cc_algorithm(quiche::CongestionControlAlgorithm::Reno);

    if std::env::var_os("SSLKEYLOGFILE").is_some() {
        config.log_keys();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_fails_without_certificate_material() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ServerOptions {
            bind: "127.0.0.1:0".parse().unwrap(),
            cert: dir.path().join("missing.crt"),
            key: dir.path().join("missing.key"),
            root: dir.path().to_path_buf(),
        };

        let err = Server::bind(opts).unwrap_err();
        assert!(err.to_string().contains("certificate"));
    }
}

