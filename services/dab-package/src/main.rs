//! dab-package - packaging path for transmission testing
//!
//! Listens on a local UDP port, wraps every received payload into DAB
//! packet mode transport and appends the result to a file a modulator can
//! pick up. Deliberately single threaded: the sink is a local stream, so
//! blocking on it is fine.

mod config;
mod wrap;

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::net::{Ipv4Addr, UdpSocket};

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::PackageConfig;
use wrap::Packager;

/// Receive buffer size; larger datagrams are truncated, not an error.
const RECEIVE_BUFFER: usize = 1024;

fn main() -> Result<()> {
    init_logging();

    let config = PackageConfig::from_env();
    info!(
        "packaging UDP port {} into packet address {} at {}",
        config.listen_port,
        config.packet_address,
        config.sink_path.display()
    );

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.listen_port))
        .with_context(|| format!("failed to bind UDP port {}", config.listen_port))?;
    let sink = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.sink_path)
        .with_context(|| format!("failed to open the sink at {}", config.sink_path.display()))?;
    let mut sink = BufWriter::new(sink);

    let mut packager = Packager::new(config);
    let mut buffer = [0u8; RECEIVE_BUFFER];

    loop {
        let (received, peer) = socket
            .recv_from(&mut buffer)
            .context("failed to receive from the local transport")?;
        debug!("received {received} bytes from {peer}");

        let wrapped = packager.wrap(&buffer[..received]);
        sink.write_all(&wrapped)
            .and_then(|_| sink.flush())
            .context("failed to append to the packaging sink")?;
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
