//! Virtual network interface handling
//!
//! Reassembled datagrams leave the pipeline through a Linux tun device, so
//! the kernel routes them like traffic from any other interface.

mod device;

pub use device::{TunDevice, TunError, TunWriter};
