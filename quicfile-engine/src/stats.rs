//! Connection statistics snapshot.

use std::time::Duration;

/// Point-in-time connection statistics.
///
/// The I/O thread refreshes the snapshot after each egress flush; readers
/// take whatever the last refresh left behind. The values may therefore
/// lag the wire by one loop iteration, which callers tolerate.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_lost: u64,
    /// Smoothed round-trip time of the active path.
    pub rtt: Duration,
    /// Congestion window of the active path, in bytes.
    pub cwnd: u64,
}
