//! Linux tun device wrapper
//!
//! The device node provides the packet path; interface configuration
//! (address, netmask, up state) is not available through it and goes over
//! a plain datagram socket instead. Both descriptors have independent
//! lifetimes: the control socket closes when the device is dropped, the
//! packet descriptor closes when the writer task finishes with it.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const TUN_DEVICE_PATH: &str = "/dev/net/tun";

const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

const NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

#[derive(Debug, Error)]
pub enum TunError {
    #[error("failed to open /dev/net/tun: {0}")]
    DeviceOpen(#[source] io::Error),

    #[error("failed to register interface {name}: {source}")]
    Register {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {name} to the I/O driver: {source}")]
    EventLoop {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("interface control socket is not connected")]
    NotConnected,

    #[error("interface control request failed: {0}")]
    Control(#[source] io::Error),

    #[error("not an IPv4 address: {0:?}")]
    InvalidAddress(String),
}

/// Datagram socket used only for interface ioctls.
///
/// When the socket cannot be opened the device still works as a packet
/// path, but every configuration call reports `NotConnected` instead of
/// reaching the kernel.
#[derive(Debug)]
struct ControlSocket(Option<OwnedFd>);

impl ControlSocket {
    fn open() -> Self {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            warn!(
                "interface control socket unavailable: {}",
                io::Error::last_os_error()
            );
            Self(None)
        } else {
            Self(Some(unsafe { OwnedFd::from_raw_fd(fd) }))
        }
    }

    #[cfg(test)]
    fn disconnected() -> Self {
        Self(None)
    }

    fn request(&self, op: libc::c_ulong, request: &mut libc::ifreq) -> Result<(), TunError> {
        let fd = self.0.as_ref().ok_or(TunError::NotConnected)?;
        if unsafe { libc::ioctl(fd.as_raw_fd(), op, request) } < 0 {
            Err(TunError::Control(io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }
}

/// One open tun interface.
pub struct TunDevice {
    fd: AsyncFd<File>,
    name: String,
    control: ControlSocket,
}

impl TunDevice {
    /// Create a tun device, requesting the given name.
    ///
    /// The kernel is free to assign a different name; `name()` returns the
    /// one it actually picked. Must be called from within the runtime so
    /// the descriptor can register with the reactor.
    pub fn open(name: &str) -> Result<Self, TunError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(TUN_DEVICE_PATH)
            .map_err(TunError::DeviceOpen)?;

        let mut request = ifreq_named(name);
        request.ifr_ifru.ifru_flags = IFF_TUN | IFF_NO_PI;
        if unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &mut request) } < 0 {
            return Err(TunError::Register {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        let assigned = ifreq_name(&request);

        set_nonblocking(&file).map_err(|source| TunError::EventLoop {
            name: assigned.clone(),
            source,
        })?;
        let fd = AsyncFd::new(file).map_err(|source| TunError::EventLoop {
            name: assigned.clone(),
            source,
        })?;

        info!("created tunnel interface {assigned}");
        Ok(Self {
            fd,
            name: assigned,
            control: ControlSocket::open(),
        })
    }

    /// The name the kernel assigned to the interface.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the administrative state to up.
    pub fn bring_up(&self) -> Result<(), TunError> {
        let mut request = ifreq_named(&self.name);
        request.ifr_ifru.ifru_flags = libc::IFF_UP as libc::c_short;
        self.control.request(libc::SIOCSIFFLAGS, &mut request)
    }

    /// Assign an IPv4 address with a fixed /24 netmask.
    ///
    /// The netmask is only applied once the address call succeeded, and its
    /// failure is what the caller sees.
    pub fn set_address(&self, address: &str) -> Result<(), TunError> {
        let parsed: Ipv4Addr = address
            .parse()
            .map_err(|_| TunError::InvalidAddress(address.to_string()))?;

        let mut request = ifreq_named(&self.name);
        write_sockaddr(&mut request, parsed);
        self.control.request(libc::SIOCSIFADDR, &mut request)?;

        let mut request = ifreq_named(&self.name);
        write_sockaddr(&mut request, NETMASK);
        self.control.request(libc::SIOCSIFNETMASK, &mut request)
    }

    /// Read back the configured address. Best effort: any failure yields an
    /// empty string.
    pub fn address(&self) -> String {
        let mut request = ifreq_named(&self.name);
        // SIOCGIFADDR expects the family pre-set
        write_sockaddr(&mut request, Ipv4Addr::UNSPECIFIED);
        match self.control.request(libc::SIOCGIFADDR, &mut request) {
            Ok(()) => read_sockaddr(&request)
                .map(|address| address.to_string())
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    /// Hand the device to its writer task and return the queueing handle.
    ///
    /// The task owns the device from here on; it ends, releasing the packet
    /// descriptor, once every `TunWriter` clone is gone.
    pub fn start_writer(self) -> (TunWriter, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let task = tokio::spawn(async move {
            while let Some(buffer) = rx.recv().await {
                if let Err(error) = self.write(&buffer).await {
                    warn!(
                        "failed to write {} bytes to {}: {error}",
                        buffer.len(),
                        self.name
                    );
                }
            }
            debug!("writer for {} finished", self.name);
        });
        (TunWriter { tx }, task)
    }

    async fn write(&self, buffer: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| {
                let written = unsafe {
                    libc::write(
                        inner.get_ref().as_raw_fd(),
                        buffer.as_ptr() as *const libc::c_void,
                        buffer.len(),
                    )
                };
                if written < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(written as usize)
                }
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

/// Cloneable handle that queues datagrams for delivery through the device.
///
/// `enqueue` never blocks. Each buffer is attempted once; failures are
/// logged by the writer task and the caller is not told, since the decode
/// path has no per-write recovery anyway.
#[derive(Clone)]
pub struct TunWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl TunWriter {
    pub fn enqueue(&self, datagram: Vec<u8>) {
        if self.tx.send(datagram).is_err() {
            debug!("tunnel writer is gone, dropping datagram");
        }
    }

    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

fn set_nonblocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Zeroed interface request with the name field filled in, truncated to
/// the kernel's name length limit.
fn ifreq_named(name: &str) -> libc::ifreq {
    let mut request: libc::ifreq = unsafe { mem::zeroed() };
    for (slot, byte) in request
        .ifr_name
        .iter_mut()
        .zip(name.as_bytes().iter().take(libc::IFNAMSIZ - 1))
    {
        *slot = *byte as libc::c_char;
    }
    request
}

fn ifreq_name(request: &libc::ifreq) -> String {
    request
        .ifr_name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8 as char)
        .collect()
}

fn write_sockaddr(request: &mut libc::ifreq, address: Ipv4Addr) {
    let socket_address = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr {
            s_addr: u32::from(address).to_be(),
        },
        sin_zero: [0; 8],
    };
    // sockaddr_in fits the address slot of the request union
    unsafe {
        std::ptr::write(
            &mut request.ifr_ifru.ifru_addr as *mut libc::sockaddr as *mut libc::sockaddr_in,
            socket_address,
        );
    }
}

fn read_sockaddr(request: &libc::ifreq) -> Option<Ipv4Addr> {
    let socket_address = unsafe {
        &*(&request.ifr_ifru.ifru_addr as *const libc::sockaddr as *const libc::sockaddr_in)
    };
    if socket_address.sin_family != libc::AF_INET as libc::sa_family_t {
        return None;
    }
    Some(Ipv4Addr::from(u32::from_be(socket_address.sin_addr.s_addr)))
}
