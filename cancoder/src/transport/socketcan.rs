//! Kernel CAN interface via raw SocketCAN sockets.
//!
//! Opens a `PF_CAN`/`CAN_RAW` socket bound to a named network interface and
//! drives it nonblocking under tokio's `AsyncFd`. The wire structs mirror the
//! kernel's `can_frame` layout.

use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use libc::{c_int, c_short};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::tracing::prelude::*;
use crate::transport::{forward_or_drop, DEFAULT_CHANNEL_CAPACITY};

// Constants from <linux/can.h>; the libc crate does not carry them.
const AF_CAN: c_int = 29;
const PF_CAN: c_int = 29;
const CAN_RAW: c_int = 1;

/// 29-bit extended-format flag on the kernel id word.
const EFF_FLAG: u32 = 0x8000_0000;
/// Error-frame flag.
const ERR_FLAG: u32 = 0x2000_0000;
/// Valid bits of a standard 11-bit id.
const SFF_MASK: u32 = 0x0000_07ff;
/// Valid bits of an extended 29-bit id.
const EFF_MASK: u32 = 0x1fff_ffff;

#[repr(C, align(8))]
struct CanAddr {
    af_can: c_short,
    if_index: c_int,
}

/// Same memory layout as the kernel's `struct can_frame`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C, align(8))]
struct KernelFrame {
    id: u32,
    dlc: u8,
    pad: u8,
    res0: u8,
    res1: u8,
    data: [u8; 8],
}

struct RawCanSocket {
    fd: RawFd,
}

impl RawCanSocket {
    fn open(interface: &str) -> Result<Self> {
        let if_index = nix::net::if_::if_nametoindex(interface)
            .map_err(|errno| Error::TransportOpen(io::Error::from(errno)))?;

        let fd = unsafe { libc::socket(PF_CAN, libc::SOCK_RAW, CAN_RAW) };
        if fd == -1 {
            return Err(Error::TransportOpen(io::Error::last_os_error()));
        }

        let addr = CanAddr {
            af_can: AF_CAN as c_short,
            if_index: if_index as c_int,
        };
        let bound = unsafe {
            libc::bind(
                fd,
                (&addr as *const CanAddr).cast::<libc::sockaddr>(),
                size_of::<CanAddr>() as libc::socklen_t,
            )
        };
        if bound == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::TransportOpen(err));
        }

        let socket = Self { fd };
        socket
            .set_nonblocking()
            .map_err(Error::TransportOpen)?;
        Ok(socket)
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL) };
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        let result = unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn read_frame(&self) -> io::Result<KernelFrame> {
        let mut frame = KernelFrame::default();
        let read = unsafe {
            libc::read(
                self.fd,
                (&mut frame as *mut KernelFrame).cast::<libc::c_void>(),
                size_of::<KernelFrame>(),
            )
        };
        if read as usize != size_of::<KernelFrame>() {
            return Err(io::Error::last_os_error());
        }
        Ok(frame)
    }

    fn write_frame(&self, frame: &KernelFrame) -> io::Result<()> {
        let written = unsafe {
            libc::write(
                self.fd,
                (frame as *const KernelFrame).cast::<libc::c_void>(),
                size_of::<KernelFrame>(),
            )
        };
        if written as usize != size_of::<KernelFrame>() {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for RawCanSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for RawCanSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

struct AsyncCanSocket {
    inner: AsyncFd<RawCanSocket>,
}

impl AsyncCanSocket {
    fn new(socket: RawCanSocket) -> io::Result<Self> {
        Ok(Self {
            inner: AsyncFd::new(socket)?,
        })
    }

    async fn read(&self) -> io::Result<KernelFrame> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|fd| fd.get_ref().read_frame()) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn write(&self, frame: &KernelFrame) -> io::Result<()> {
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|fd| fd.get_ref().write_frame(frame)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

/// A kernel CAN network interface, e.g. `can0` or `vcan0`.
pub struct KernelInterface {
    interface: String,
    socket: Option<Arc<AsyncCanSocket>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl KernelInterface {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            socket: None,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub async fn connect(&mut self) -> Result<mpsc::Receiver<Frame>> {
        let raw = RawCanSocket::open(&self.interface)?;
        let socket = Arc::new(AsyncCanSocket::new(raw).map_err(Error::TransportOpen)?);
        self.socket = Some(Arc::clone(&socket));

        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let shutdown = self.shutdown.clone();
        let interface = self.interface.clone();

        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    read = socket.read() => match read {
                        Ok(kernel) => {
                            let Some(frame) = frame_from_kernel(&kernel) else {
                                continue;
                            };
                            if !forward_or_drop(&tx, frame, &interface) {
                                break;
                            }
                        }
                        Err(err) => {
                            error!(interface = %interface, error = %err, "can socket read failed");
                            break;
                        }
                    },
                }
            }
            debug!(interface = %interface, "receive loop ended");
        });
        self.tracker.close();

        Ok(rx)
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(not_connected)?;
        let kernel = kernel_from_frame(frame);
        socket.write(&kernel).await.map_err(Error::TransportIo)
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.shutdown.cancel();
        self.socket = None;
        self.tracker.wait().await;
        Ok(())
    }
}

fn not_connected() -> Error {
    Error::TransportIo(io::Error::new(
        io::ErrorKind::NotConnected,
        "interface not connected",
    ))
}

/// Convert a kernel frame, masking the id flag bits. Error frames are
/// dropped.
fn frame_from_kernel(kernel: &KernelFrame) -> Option<Frame> {
    if kernel.id & ERR_FLAG != 0 {
        warn!(id = format!("{:#x}", kernel.id & EFF_MASK), "dropping bus error frame");
        return None;
    }
    let id = if kernel.id & EFF_FLAG != 0 {
        kernel.id & EFF_MASK
    } else {
        kernel.id & SFF_MASK
    };
    let dlc = (kernel.dlc as usize).min(kernel.data.len());
    Frame::new(id, &kernel.data[..dlc]).ok()
}

fn kernel_from_frame(frame: &Frame) -> KernelFrame {
    let mut id = frame.arbitration_id();
    if id > SFF_MASK {
        id |= EFF_FLAG;
    }
    KernelFrame {
        id,
        dlc: frame.dlc(),
        pad: 0,
        res0: 0,
        res1: 0,
        data: *frame.data(),
    }
}
