//! Configuration loaded from environment variables

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

/// Packaging configuration. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct PackageConfig {
    /// Packet address the generated packets carry
    pub packet_address: u16,

    /// Destination endpoint written into the synthesized datagrams
    pub destination: SocketAddrV4,

    /// Source endpoint written into the synthesized datagrams
    pub source: SocketAddrV4,

    /// Local UDP port the payloads arrive on
    pub listen_port: u16,

    /// File the packaged byte stream is appended to
    pub sink_path: PathBuf,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            packet_address: 1000,
            destination: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 4242),
            source: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 1337),
            listen_port: 4321,
            sink_path: PathBuf::from("/tmp/dabdata"),
        }
    }
}

impl PackageConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            packet_address: env_parsed("PACKET_ADDRESS").unwrap_or(defaults.packet_address),
            destination: SocketAddrV4::new(
                env_parsed("DESTINATION_IP").unwrap_or(*defaults.destination.ip()),
                env_parsed("DESTINATION_PORT").unwrap_or(defaults.destination.port()),
            ),
            source: SocketAddrV4::new(
                env_parsed("SOURCE_IP").unwrap_or(*defaults.source.ip()),
                env_parsed("SOURCE_PORT").unwrap_or(defaults.source.port()),
            ),
            listen_port: env_parsed("LISTEN_PORT").unwrap_or(defaults.listen_port),
            sink_path: std::env::var("SINK_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.sink_path),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_defaults() {
        let config = PackageConfig::default();
        assert_eq!(config.packet_address, 1000);
        assert_eq!(config.destination.to_string(), "10.0.0.1:4242");
        assert_eq!(config.source.to_string(), "10.0.0.2:1337");
        assert_eq!(config.listen_port, 4321);
    }
}
