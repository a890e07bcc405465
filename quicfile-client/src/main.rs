//! HTTP-over-QUIC file download client.

mod download;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quicfile_engine::{ConfigKey, ConfigMap, ConfigValue, Engine};

/// Connect timeout for the QUIC handshake.
const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Download a file over QUIC and verify its integrity tag.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server hostname or IP address
    host: String,

    /// Server UDP port
    port: u16,

    /// URI to request, e.g. /hello.bin
    uri: String,

    /// Output file path
    #[arg(default_value = "download.bin")]
    output: PathBuf,
}

fn main() -> Result<()> {
    init_logging();

    // Usage failures exit with 1, like transport failures.
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(1);
    });

    info!(
        host = %cli.host,
        port = cli.port,
        uri = %cli.uri,
        output = %cli.output.display(),
        "starting download"
    );

    let engine = Engine::new();
    engine
        .open(client_config())
        .context("failed to open engine")?;

    let (event_tx, event_rx) = unbounded();
    engine.set_event_callback(move |event| {
        let _ = event_tx.send(event.clone());
    });

    let scid = engine
        .connect(&cli.host, cli.port, CONNECT_TIMEOUT_MS)
        .with_context(|| format!("connection to {}:{} failed", cli.host, cli.port))?;
    info!(scid = %scid, "connected");

    let result = download::download(&engine, &cli.host, &cli.uri, &cli.output, &event_rx);

    let stats = engine.stats();
    engine.close(0, "download complete");

    info!(
        packets_sent = stats.packets_sent,
        packets_received = stats.packets_received,
        bytes_sent = stats.bytes_sent,
        bytes_received = stats.bytes_received,
        packets_lost = stats.packets_lost,
        rtt_ms = stats.rtt.as_secs_f64() * 1_000.0,
        cwnd = stats.cwnd,
        "connection statistics"
    );

    let summary = result?;
    info!(
        status = summary.status,
        bytes = summary.bytes_received,
        output = %cli.output.display(),
        "done"
    );

    // An integrity mismatch is reported (by the download driver, on
    // stderr) but does not fail the process; the bytes are already on
    // disk for inspection.
    Ok(())
}

/// Engine configuration for the download client: long idle timeout and
/// wide flow-control windows for bulk transfer, no peer verification so
/// self-signed server certificates work.
fn client_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert(ConfigKey::MaxIdleTimeout, ConfigValue::U64(300_000));
    config.insert(ConfigKey::MaxUdpPayloadSize, ConfigValue::U64(1_350));
    config.insert(ConfigKey::InitialMaxData, ConfigValue::U64(100_000_000));
    config.insert(
        ConfigKey::InitialMaxStreamDataBidiLocal,
        ConfigValue::U64(50_000_000),
    );
    config.insert(
        ConfigKey::InitialMaxStreamDataBidiRemote,
        ConfigValue::U64(50_000_000),
    );
    config.insert(
        ConfigKey::InitialMaxStreamDataUni,
        ConfigValue::U64(10_000_000),
    );
    config.insert(ConfigKey::InitialMaxStreamsBidi, ConfigValue::U64(100));
    config.insert(ConfigKey::InitialMaxStreamsUni, ConfigValue::U64(100));
    config.insert(ConfigKey::DisableActiveMigration, ConfigValue::Bool(true));
    config.insert(ConfigKey::EnableDebugLog, ConfigValue::Bool(false));
    config.insert(ConfigKey::VerifyPeer, ConfigValue::Bool(false));
    config
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
