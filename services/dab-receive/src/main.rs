//! dab-receive - DAB data service to IP bridge
//!
//! Tunes a DAB multiplex, selects its IP data service and feeds the
//! reassembled datagrams into the host network stack through a tun
//! interface.

mod config;
mod ensemble;
mod pipeline;
mod sdr;
mod tun;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use pipeline::Shutdown;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let (destination, address_text) = match (args.next(), args.next(), args.next()) {
        (Some(destination), Some(address), None) => (destination, address),
        _ => {
            eprintln!("usage: dab-receive <destination_ip> <packet_address>");
            std::process::exit(1);
        }
    };
    let packet_address: u16 = address_text
        .parse()
        .with_context(|| format!("packet address {address_text:?} is not a number"))?;

    let config = Config::from_env();
    info!("bridging packet address {packet_address} to {destination}");

    let shutdown = Shutdown::default();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping the pipeline");
            trigger.trigger();
        }
    });

    pipeline::run(config, &destination, packet_address, shutdown).await
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
