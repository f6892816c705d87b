//! Raw socket transport: one ICMPv4 reader and one `IP_HDRINCL` writer

use super::{FrameSource, ProbeSink};
use crate::packet::{to_ipv4, Ipv4Header};
use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::io::unix::AsyncFd;

/// Raw ICMPv4 socket bound to the wildcard address
///
/// Linux delivers every inbound ICMP message to every raw ICMP socket, so
/// frames unrelated to this process show up here too.
pub struct RawIcmpSource {
    // Only locked while polling, never across an await; `None` once closed
    fd: Mutex<Option<AsyncFd<Socket>>>,
}

impl RawIcmpSource {
    /// Open the socket. Must be called from within a Tokio runtime.
    pub fn open() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
        Ok(Self {
            fd: Mutex::new(Some(AsyncFd::new(socket)?)),
        })
    }

    fn poll_recv(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, Ipv4Addr)>> {
        let guard = self.fd.lock().expect("mutex poisoned");
        let Some(fd) = guard.as_ref() else {
            return Poll::Ready(Err(closed()));
        };
        loop {
            let mut ready = match fd.poll_read_ready(cx) {
                Poll::Ready(Ok(ready)) => ready,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            match ready.try_io(|fd| recv_from(fd.get_ref(), &mut *buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket closed")
}

fn recv_from(socket: &Socket, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
    // SAFETY: recv_from only writes into the buffer, so viewing initialised
    // bytes as MaybeUninit never exposes uninitialised memory.
    let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
    let (size, addr) = socket.recv_from(uninit)?;
    let from = addr
        .as_socket_ipv4()
        .map_or(Ipv4Addr::UNSPECIFIED, |a| *a.ip());
    Ok((size, from))
}

#[async_trait]
impl FrameSource for RawIcmpSource {
    async fn recv_frame(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        std::future::poll_fn(|cx| self.poll_recv(cx, &mut *buf)).await
    }

    fn close(&self) -> io::Result<()> {
        match self.fd.lock().expect("mutex poisoned").take() {
            // into_inner deregisters from the reactor before the descriptor closes
            Some(fd) => close_socket(fd.into_inner()),
            None => Ok(()),
        }
    }
}

/// Raw IPv4 socket that sends caller-built headers (`IP_HDRINCL`)
///
/// The socket is non-blocking: when the send buffer is full, `send` fails
/// with [`io::ErrorKind::WouldBlock`] and the probe counts as lost instead
/// of stalling the runtime.
pub struct RawIpSink {
    // Writes are serialised here; `None` once closed
    socket: Mutex<Option<Socket>>,
}

impl RawIpSink {
    /// Open the socket bound to `local`
    pub fn open(local: Ipv4Addr) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::UDP))?;
        set_header_included(&socket)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddrV4::new(local, 0).into())?;
        Ok(Self {
            socket: Mutex::new(Some(socket)),
        })
    }
}

fn set_header_included(socket: &Socket) -> io::Result<()> {
    let enable: libc::c_int = 1;
    // SAFETY: the option value points at a live c_int of the advertised size
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_HDRINCL,
            &enable as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Close a socket and report the error `close(2)` returns, which drop would discard
fn close_socket(socket: Socket) -> io::Result<()> {
    let fd = socket.into_raw_fd();
    // SAFETY: into_raw_fd transferred ownership of the descriptor to us
    if unsafe { libc::close(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl ProbeSink for RawIpSink {
    fn send(&self, header: &Ipv4Header, datagram: &[u8]) -> io::Result<()> {
        let packet = header
            .encode(datagram)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let dst = to_ipv4(header.dst).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "destination is not IPv4")
        })?;
        let addr = SockAddr::from(SocketAddrV4::new(dst, 0));

        let guard = self.socket.lock().expect("mutex poisoned");
        let socket = guard.as_ref().ok_or_else(closed)?;
        socket.send_to(&packet, &addr)?;
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        match self.socket.lock().expect("mutex poisoned").take() {
            Some(socket) => close_socket(socket),
            None => Ok(()),
        }
    }
}
