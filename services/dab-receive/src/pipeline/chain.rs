//! Reassembly chain for one activated service
//!
//! Each payload unit runs through the packet parser and, when that emits a
//! complete data group, through the data group parser. Only a fully
//! reassembled datagram reaches the tunnel write queue. Both parsers keep
//! their state for the life of the service; parse errors are logged with
//! their numeric code and the unit is discarded.

use dab_transport::{DataGroupParser, PacketParser};
use tracing::warn;

use crate::tun::TunWriter;

pub struct ReassemblyChain {
    packets: PacketParser,
    groups: DataGroupParser,
    writer: TunWriter,
}

impl ReassemblyChain {
    pub fn new(packet_address: u16, writer: TunWriter) -> Self {
        Self {
            packets: PacketParser::new(packet_address),
            groups: DataGroupParser::new(),
            writer,
        }
    }

    /// Feed one service payload unit forward.
    pub fn ingest(&mut self, unit: Vec<u8>) {
        let group = match self.packets.parse(unit) {
            Ok(Some(group)) => group,
            Ok(None) => return,
            Err(error) => {
                warn!("packet error {}: {error}", error.code());
                return;
            }
        };
        match self.groups.parse(group) {
            Ok(Some(datagram)) => self.writer.enqueue(datagram),
            Ok(None) => {}
            Err(error) => warn!("data group error {}: {error}", error.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dab_transport::packet::PACKET_SIZES;
    use dab_transport::{DataGroupGenerator, PacketGenerator};

    /// Packet-sized units for one datagram, as the decoder would deliver
    /// them.
    fn units_for(datagram: &[u8], address: u16) -> Vec<Vec<u8>> {
        let mut groups = DataGroupGenerator::new();
        let mut packets = PacketGenerator::new(address);
        let stream = packets.build(&groups.build(datagram));

        let mut units = Vec::new();
        let mut rest = stream.as_slice();
        while !rest.is_empty() {
            let size = PACKET_SIZES[(rest[0] >> 6) as usize];
            units.push(rest[..size].to_vec());
            rest = &rest[size..];
        }
        units
    }

    #[test]
    fn test_complete_sequence_enqueues_exactly_one_datagram() {
        let (writer, mut written) = TunWriter::test_pair();
        let mut chain = ReassemblyChain::new(1000, writer);

        let datagram: Vec<u8> = (0..=255).cycle().take(300).collect();
        for unit in units_for(&datagram, 1000) {
            chain.ingest(unit);
        }

        assert_eq!(written.try_recv().unwrap(), datagram);
        assert!(written.try_recv().is_err());
    }

    #[test]
    fn test_truncated_sequence_enqueues_nothing() {
        let (writer, mut written) = TunWriter::test_pair();
        let mut chain = ReassemblyChain::new(1000, writer);

        let datagram: Vec<u8> = vec![0x42; 300];
        let mut units = units_for(&datagram, 1000);
        units.pop();
        for unit in units {
            chain.ingest(unit);
        }

        assert!(written.try_recv().is_err());
    }

    #[test]
    fn test_corrupt_unit_is_contained() {
        let (writer, mut written) = TunWriter::test_pair();
        let mut chain = ReassemblyChain::new(1000, writer);

        let mut units = units_for(b"datagram", 1000);
        let last = units[0].len() - 1;
        units[0][last] ^= 0xFF;
        chain.ingest(units[0].clone());
        assert!(written.try_recv().is_err());

        // The chain keeps running after a bad unit
        for unit in units_for(b"datagram", 1000) {
            chain.ingest(unit);
        }
        assert_eq!(written.try_recv().unwrap(), b"datagram".to_vec());
    }
}
