//! Receive pipeline coordination
//!
//! Owns the lifetimes of the pipeline stages and wires their hand-offs.
//! The tunnel interface is configured first, because the service callback
//! registered later assumes it is ready. Acquisition and demodulation then
//! run on their own threads while the update loop drives the ensemble on
//! the calling context. A stop request flips an advisory flag; every stage
//! is joined with a bounded grace period on the way out.

mod chain;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time;
use tracing::{info, warn};

use crate::config::Config;
use crate::ensemble::{Ensemble, ServiceInfo, ServiceKind, IP_DATAGRAM_COMPONENT};
use crate::sdr::{Demodulator, SampleCapture};
use crate::tun::{TunDevice, TunWriter};

pub use chain::ReassemblyChain;

/// How long each stage gets to wind down before it is abandoned.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared stop condition, set once by the interrupt handler.
#[derive(Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run the receive pipeline until the broadcast ends or a stop is
/// requested.
pub async fn run(
    config: Config,
    destination: &str,
    packet_address: u16,
    shutdown: Shutdown,
) -> Result<()> {
    // The tunnel must be ready before any ensemble work starts
    let device = TunDevice::open(&config.tun_name).context("failed to create the tunnel interface")?;
    device
        .set_address(destination)
        .with_context(|| format!("failed to address {}", device.name()))?;
    device
        .bring_up()
        .with_context(|| format!("failed to bring {} up", device.name()))?;
    info!("tunnel interface {} is up at {}", device.name(), device.address());
    let (writer, writer_task) = device.start_writer();

    let (capture, samples) = SampleCapture::start(config.capture)?;
    let (decoder, records) = match Demodulator::start(config.decoder, samples) {
        Ok(stage) => stage,
        Err(error) => {
            capture.stop();
            capture.join(SHUTDOWN_GRACE).await;
            return Err(error);
        }
    };

    let mut ensemble = Ensemble::new(records);
    let outcome = drive_ensemble(&mut ensemble, packet_address, writer, &shutdown);

    capture.stop();
    decoder.stop();
    // Dropping the ensemble closes the record channel, which unblocks the
    // decoder if it sits on a full queue, and releases the callback's
    // writer handle so the writer task can drain out
    drop(ensemble);
    capture.join(SHUTDOWN_GRACE).await;
    decoder.join(SHUTDOWN_GRACE).await;
    if time::timeout(SHUTDOWN_GRACE, writer_task).await.is_err() {
        warn!("tunnel writer did not drain within {SHUTDOWN_GRACE:?}, abandoning it");
    }

    outcome
}

/// Acquire the ensemble, activate the IP data service and consume payload
/// until the stream ends or a stop is requested.
fn drive_ensemble(
    ensemble: &mut Ensemble,
    packet_address: u16,
    writer: TunWriter,
    shutdown: &Shutdown,
) -> Result<()> {
    while !ensemble.is_complete() {
        if shutdown.is_triggered() {
            info!("stopped while acquiring the ensemble");
            return Ok(());
        }
        if !ensemble.update() {
            bail!("the ensemble ended before its description completed");
        }
    }

    let service = match select_data_service(ensemble.services()) {
        Some(service) => service.id,
        None => bail!(
            "no usable data service in ensemble {}",
            ensemble.label().unwrap_or("<unlabeled>")
        ),
    };

    let mut chain = ReassemblyChain::new(packet_address, writer);
    ensemble.activate(service, Box::new(move |unit| chain.ingest(unit)));

    while !shutdown.is_triggered() && ensemble.update() {}
    info!("receive loop finished");
    Ok(())
}

/// Pick the first data service whose primary component carries IP
/// datagrams.
fn select_data_service(services: &[ServiceInfo]) -> Option<&ServiceInfo> {
    services
        .iter()
        .find(|service| service.kind == ServiceKind::Data && service.component_type == IP_DATAGRAM_COMPONENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::EnsembleRecord;
    use crossbeam_channel::unbounded;
    use dab_transport::packet::PACKET_SIZES;
    use dab_transport::{DataGroupGenerator, PacketGenerator};

    fn service(id: u32, kind: ServiceKind, component_type: u8) -> ServiceInfo {
        ServiceInfo {
            id,
            kind,
            component_type,
        }
    }

    #[test]
    fn test_selection_prefers_the_first_qualifying_service() {
        let services = [
            service(1, ServiceKind::Audio, 0),
            service(2, ServiceKind::Data, 5),
            service(3, ServiceKind::Data, IP_DATAGRAM_COMPONENT),
            service(4, ServiceKind::Data, IP_DATAGRAM_COMPONENT),
        ];
        assert_eq!(select_data_service(&services).map(|s| s.id), Some(3));
    }

    #[test]
    fn test_selection_rejects_lookalikes() {
        let services = [
            service(1, ServiceKind::Audio, IP_DATAGRAM_COMPONENT),
            service(2, ServiceKind::Data, 60),
        ];
        assert!(select_data_service(&services).is_none());
    }

    #[test]
    fn test_drive_fails_without_a_data_service() {
        let (tx, rx) = unbounded();
        let mut ensemble = Ensemble::new(rx);
        tx.send(EnsembleRecord::Service(service(1, ServiceKind::Audio, 0)))
            .unwrap();
        tx.send(EnsembleRecord::Complete).unwrap();
        drop(tx);

        let (writer, _written) = TunWriter::test_pair();
        let error = drive_ensemble(&mut ensemble, 1000, writer, &Shutdown::default())
            .expect_err("an ensemble without data services must fail");
        assert!(error.to_string().contains("no usable data service"));
    }

    #[test]
    fn test_drive_fails_when_the_stream_ends_early() {
        let (tx, rx) = unbounded::<EnsembleRecord>();
        let mut ensemble = Ensemble::new(rx);
        drop(tx);

        let (writer, _written) = TunWriter::test_pair();
        let error = drive_ensemble(&mut ensemble, 1000, writer, &Shutdown::default())
            .expect_err("losing the decoder before completion must fail");
        assert!(error.to_string().contains("before its description"));
    }

    #[test]
    fn test_drive_stops_on_request_while_acquiring() {
        let (_tx, rx) = unbounded::<EnsembleRecord>();
        let mut ensemble = Ensemble::new(rx);

        let shutdown = Shutdown::default();
        shutdown.trigger();
        let (writer, _written) = TunWriter::test_pair();
        drive_ensemble(&mut ensemble, 1000, writer, &shutdown).unwrap();
    }

    #[test]
    fn test_drive_delivers_one_datagram_end_to_end() {
        let (tx, rx) = unbounded();
        let mut ensemble = Ensemble::new(rx);

        let datagram: Vec<u8> = (0..=255).cycle().take(300).collect();
        let mut groups = DataGroupGenerator::new();
        let mut packets = PacketGenerator::new(1000);
        let stream = packets.build(&groups.build(&datagram));

        tx.send(EnsembleRecord::Service(service(
            0xE0D2_10AB,
            ServiceKind::Data,
            IP_DATAGRAM_COMPONENT,
        )))
        .unwrap();
        tx.send(EnsembleRecord::Complete).unwrap();
        let mut rest = stream.as_slice();
        while !rest.is_empty() {
            let size = PACKET_SIZES[(rest[0] >> 6) as usize];
            tx.send(EnsembleRecord::Data {
                service: 0xE0D2_10AB,
                payload: rest[..size].to_vec(),
            })
            .unwrap();
            rest = &rest[size..];
        }
        drop(tx);

        let (writer, mut written) = TunWriter::test_pair();
        drive_ensemble(&mut ensemble, 1000, writer, &Shutdown::default()).unwrap();

        assert_eq!(written.try_recv().unwrap(), datagram);
        assert!(written.try_recv().is_err());
    }
}
