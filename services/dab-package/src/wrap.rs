//! Payload packaging
//!
//! Wraps one application payload into a synthesized IPv4/UDP datagram,
//! then into data groups and packet mode packets. The generators live in
//! the packager so group and packet sequence numbering stays continuous
//! for the whole run.

use dab_transport::datagram::build_udp_datagram;
use dab_transport::{DataGroupGenerator, PacketGenerator};

use crate::config::PackageConfig;

pub struct Packager {
    config: PackageConfig,
    groups: DataGroupGenerator,
    packets: PacketGenerator,
    ident: u16,
}

impl Packager {
    pub fn new(config: PackageConfig) -> Self {
        let packets = PacketGenerator::new(config.packet_address);
        Self {
            config,
            groups: DataGroupGenerator::new(),
            packets,
            ident: 0,
        }
    }

    /// Package one payload into a run of packet mode packets.
    pub fn wrap(&mut self, payload: &[u8]) -> Vec<u8> {
        let datagram = build_udp_datagram(
            self.config.source,
            self.config.destination,
            self.ident,
            payload,
        );
        self.ident = self.ident.wrapping_add(1);
        self.packets.build(&self.groups.build(&datagram))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dab_transport::datagram::{IPV4_HEADER_LEN, UDP_HEADER_LEN};
    use dab_transport::packet::PACKET_SIZES;
    use dab_transport::{DataGroupParser, PacketParser};

    fn packager() -> Packager {
        Packager::new(PackageConfig::default())
    }

    /// Run a packaged byte stream back through the receive side parsers.
    fn unwrap_stream(stream: &[u8], address: u16) -> Vec<Vec<u8>> {
        let mut packets = PacketParser::new(address);
        let mut groups = DataGroupParser::new();
        let mut datagrams = Vec::new();

        let mut rest = stream;
        while !rest.is_empty() {
            let size = PACKET_SIZES[(rest[0] >> 6) as usize];
            if let Some(group) = packets.parse(rest[..size].to_vec()).unwrap() {
                if let Some(datagram) = groups.parse(group).unwrap() {
                    datagrams.push(datagram);
                }
            }
            rest = &rest[size..];
        }
        datagrams
    }

    #[test]
    fn test_wrap_roundtrips_through_the_receive_codecs() {
        let mut packager = packager();
        let wrapped = packager.wrap(b"hello");

        assert!(!wrapped.is_empty());
        assert!(wrapped.len() > b"hello".len());

        let datagrams = unwrap_stream(&wrapped, 1000);
        assert_eq!(datagrams.len(), 1);

        let datagram = &datagrams[0];
        // Synthesized addressing from the configuration defaults
        assert_eq!(&datagram[12..16], &[10, 0, 0, 2]);
        assert_eq!(&datagram[16..20], &[10, 0, 0, 1]);
        assert_eq!(u16::from_be_bytes([datagram[20], datagram[21]]), 1337);
        assert_eq!(u16::from_be_bytes([datagram[22], datagram[23]]), 4242);
        assert_eq!(&datagram[IPV4_HEADER_LEN + UDP_HEADER_LEN..], b"hello");
    }

    #[test]
    fn test_sequence_numbering_is_continuous_across_payloads() {
        let mut packager = packager();
        let mut stream = packager.wrap(b"first");
        stream.extend_from_slice(&packager.wrap(b"second"));

        // A single parser pair accepts the concatenated run, which only
        // works when continuity keeps counting between wrap calls
        let datagrams = unwrap_stream(&stream, 1000);
        assert_eq!(datagrams.len(), 2);
        assert_eq!(&datagrams[0][28..], b"first");
        assert_eq!(&datagrams[1][28..], b"second");
    }

    #[test]
    fn test_ident_counts_per_datagram() {
        let mut packager = packager();
        let mut stream = packager.wrap(b"a");
        stream.extend_from_slice(&packager.wrap(b"b"));

        let datagrams = unwrap_stream(&stream, 1000);
        assert_eq!(u16::from_be_bytes([datagrams[0][4], datagrams[0][5]]), 0);
        assert_eq!(u16::from_be_bytes([datagrams[1][4], datagrams[1][5]]), 1);
    }
}
