//! Transport codecs for carrying IP traffic over a DAB packet mode channel.
//!
//! Two nested framing layers sit between an IP datagram and the broadcast
//! subchannel:
//! 1. MSC data groups wrap one datagram (segmented if it is large)
//! 2. Packet mode splits each data group into 24/48/72/96 byte packets
//!
//! The receive service runs the parsers, the packaging service runs the
//! generators, and both share the CRC and the IPv4/UDP builder.

pub mod crc;
pub mod datagram;
pub mod datagroup;
mod error;
pub mod packet;

pub use datagroup::{DataGroupGenerator, DataGroupParser};
pub use error::CodecError;
pub use packet::{PacketGenerator, PacketParser};
