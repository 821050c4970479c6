//! Bitmask backend built on `select(2)`.
//!
//! `select` overwrites its `fd_set` arguments with the result, so the
//! backend keeps two sets: `interest`, which mirrors the connection table,
//! and `working`, which is recopied from `interest` before every call.
//!
//! `width` is one more than the highest descriptor ever registered. It is
//! never lowered when that descriptor closes, so the cost of each call
//! follows the historical high-water mark rather than current membership.

use crate::runtime::error::{call, cvt, poll_failed, setup_failed, MuxError};
use crate::runtime::{Backend, ReadyEvent};
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use tracing::{debug, trace};

pub struct SelectBackend {
    listener: RawFd,
    interest: libc::fd_set,
    working: libc::fd_set,
    width: RawFd,
}

fn empty_set() -> libc::fd_set {
    unsafe {
        let mut set: libc::fd_set = mem::zeroed();
        libc::FD_ZERO(&mut set);
        set
    }
}

impl SelectBackend {
    /// Watch `listener`, which must fit in an `fd_set`.
    pub fn new(listener: RawFd) -> Result<Self, MuxError> {
        let mut backend = Self {
            listener,
            interest: empty_set(),
            working: empty_set(),
            width: 0,
        };
        if !backend.admits(listener) {
            return Err(setup_failed(
                "FD_SET",
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("listener descriptor {listener} exceeds FD_SETSIZE"),
                ),
            ));
        }
        backend.watch(listener);
        Ok(backend)
    }

    fn watch(&mut self, fd: RawFd) {
        unsafe { libc::FD_SET(fd, &mut self.interest) };
        if fd >= self.width {
            self.width = fd + 1;
            debug!(width = self.width, "Update select width");
        }
    }

    /// One more than the highest descriptor ever watched.
    #[cfg(test)]
    pub fn width(&self) -> RawFd {
        self.width
    }

    #[cfg(test)]
    pub fn is_watched(&self, fd: RawFd) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.interest) }
    }
}

impl Backend for SelectBackend {
    fn name(&self) -> &'static str {
        "select"
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn admits(&self, fd: RawFd) -> bool {
        fd >= 0 && (fd as usize) < libc::FD_SETSIZE as usize
    }

    fn register(&mut self, fd: RawFd, _slot: usize) -> Result<(), MuxError> {
        debug_assert!(self.admits(fd));
        self.watch(fd);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd, _slot: usize) {
        unsafe { libc::FD_CLR(fd, &mut self.interest) };
    }

    fn poll(&mut self, ready: &mut Vec<ReadyEvent>) -> Result<(), MuxError> {
        self.working = self.interest;

        let rc = unsafe {
            libc::select(
                self.width,
                &mut self.working,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        let n = match cvt(rc) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            result => call("select", result, poll_failed)?,
        };
        trace!(width = self.width, ready = n, "select returned");

        for fd in 0..self.width {
            if !unsafe { libc::FD_ISSET(fd, &self.working) } {
                continue;
            }
            if fd == self.listener {
                ready.push(ReadyEvent::Accept);
            } else {
                ready.push(ReadyEvent::Readable(fd));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::connection::tests::loopback_connection;
    use crate::runtime::test_util::{closed_descriptor, Interrupter};
    use std::io::Write;
    use std::net::TcpListener;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_listener_always_watched() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let backend = SelectBackend::new(listener.as_raw_fd()).unwrap();
        assert!(backend.is_watched(listener.as_raw_fd()));
        assert_eq!(backend.width(), listener.as_raw_fd() + 1);
    }

    #[test]
    fn test_readable_client_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = SelectBackend::new(listener.as_raw_fd()).unwrap();
        let (conn, mut client) = loopback_connection();

        backend.register(conn.fd(), 0).unwrap();
        client.write_all(b"ping").unwrap();

        let mut ready = Vec::new();
        backend.poll(&mut ready).unwrap();
        assert_eq!(ready, vec![ReadyEvent::Readable(conn.fd())]);

        // The interest set survives the value-result call.
        assert!(backend.is_watched(conn.fd()));
    }

    #[test]
    fn test_width_never_shrinks() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = SelectBackend::new(listener.as_raw_fd()).unwrap();
        let (conn, _client) = loopback_connection();
        let fd = conn.fd();

        backend.register(fd, 0).unwrap();
        let width = backend.width();
        assert!(width > fd);

        backend.deregister(fd, 0);
        assert!(!backend.is_watched(fd));
        assert_eq!(backend.width(), width);
    }

    #[test]
    fn test_admits_only_addressable_descriptors() {
        let backend = SelectBackend::new(3).unwrap();
        assert!(backend.admits(3));
        assert!(!backend.admits(libc::FD_SETSIZE as RawFd));
        assert!(!backend.admits(-1));
    }

    #[test]
    fn test_listener_beyond_fd_setsize_rejected() {
        match SelectBackend::new(libc::FD_SETSIZE as RawFd) {
            Err(MuxError::Setup { call, .. }) => assert_eq!(call, "FD_SET"),
            other => panic!("expected setup error, got {:?}", other.map(|b| b.width())),
        }
    }

    #[test]
    fn test_closed_descriptor_is_poll_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = SelectBackend::new(listener.as_raw_fd()).unwrap();
        backend.register(closed_descriptor(1000), 0).unwrap();

        let mut ready = Vec::new();
        match backend.poll(&mut ready) {
            Err(MuxError::Poll { call, source }) => {
                assert_eq!(call, "select");
                assert_eq!(source.raw_os_error(), Some(libc::EBADF));
            }
            other => panic!("expected poll error, got {other:?}"),
        }
        assert!(ready.is_empty());
    }

    #[test]
    fn test_interrupted_wait_is_empty() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = SelectBackend::new(listener.as_raw_fd()).unwrap();

        let _interrupter = Interrupter::start();
        let mut ready = Vec::new();
        backend.poll(&mut ready).unwrap();
        assert!(ready.is_empty());
    }
}
