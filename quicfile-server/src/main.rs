//! HTTP-over-QUIC file download server.

mod files;
mod server;
mod token;
mod transfer;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use server::{Server, ServerOptions};

/// Serve files over QUIC with minimal HTTP/1.1 framing.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host address to bind to
    host: String,

    /// UDP port to listen on
    port: u16,

    /// TLS certificate chain in PEM format
    #[arg(long, default_value = "./cert.crt")]
    cert: PathBuf,

    /// TLS private key in PEM format
    #[arg(long, default_value = "./cert.key")]
    key: PathBuf,

    /// Directory the served files are rooted at
    #[arg(long, default_value = "./data")]
    root: PathBuf,
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    let bind = (cli.host.as_str(), cli.port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {}:{}", cli.host, cli.port))?
        .next()
        .with_context(|| format!("no usable address for {}:{}", cli.host, cli.port))?;

    let server = Server::bind(ServerOptions {
        bind,
        cert: cli.cert,
        key: cli.key,
        root: cli.root,
    })?;

    server.run()
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
