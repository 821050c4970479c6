//! Listening socket and process-wide socket setup.

use crate::runtime::error::{call, cvt, setup_failed, MuxError};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use tracing::debug;

/// Ignore SIGPIPE for the rest of the process lifetime.
///
/// Writes to a peer that reset the connection then fail with `EPIPE`
/// instead of terminating the process.
pub fn ignore_sigpipe() -> Result<(), MuxError> {
    let rc = unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = libc::SIG_IGN;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGPIPE, &action, ptr::null_mut())
    };
    call("sigaction(SIGPIPE, SIG_IGN)", cvt(rc), setup_failed)?;
    Ok(())
}

/// The bound, listening socket.
///
/// Non-blocking, so a readiness report that no longer holds by the time
/// we accept costs nothing.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Create, configure, bind and listen.
    pub fn bind(addr: SocketAddr, backlog: i32) -> Result<Self, MuxError> {
        let socket = call(
            "socket",
            Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)),
            setup_failed,
        )?;

        call(
            "setsockopt(SO_REUSEADDR)",
            socket.set_reuse_address(true),
            setup_failed,
        )?;
        call("bind", socket.bind(&addr.into()), setup_failed)?;
        call("listen", socket.listen(backlog), setup_failed)?;
        call("fcntl(O_NONBLOCK)", socket.set_nonblocking(true), setup_failed)?;

        Ok(Self {
            inner: socket.into(),
        })
    }

    /// Accept one pending connection.
    ///
    /// Returns `Ok(None)` when nothing is actually pending.
    pub fn accept(&self) -> Result<Option<(TcpStream, SocketAddr)>, MuxError> {
        match self.inner.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true).map_err(MuxError::Accept)?;
                debug!(fd = stream.as_raw_fd(), peer = %peer, "[CALL] accept");
                Ok(Some((stream, peer)))
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                debug!("Listener reported ready but nothing to accept");
                Ok(None)
            }
            Err(e) => Err(MuxError::Accept(e)),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
