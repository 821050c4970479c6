//! Linux `epoll` event queue.

use crate::runtime::error::{call, cvt, poll_failed, setup_failed, MuxError};
use crate::runtime::{Backend, ReadyEvent};
use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLIN, EPOLL_CLOEXEC, EPOLL_CTL_ADD,
    EPOLL_CTL_DEL,
};
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use tracing::{debug, trace};

pub struct EpollBackend {
    epoll: OwnedFd,
    listener: RawFd,
    /// Output buffer for `epoll_wait`, rewritten by every call.
    events: Vec<epoll_event>,
}

impl EpollBackend {
    /// Create the epoll instance and register the listener.
    pub fn new(listener: RawFd, max_events: usize) -> Result<Self, MuxError> {
        let fd = call(
            "epoll_create1(EPOLL_CLOEXEC)",
            cvt(unsafe { epoll_create1(EPOLL_CLOEXEC) }),
            setup_failed,
        )?;
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut backend = Self {
            epoll,
            listener,
            events: vec![epoll_event { events: 0, u64: 0 }; max_events],
        };
        backend.add(listener)?;
        Ok(backend)
    }

    fn add(&mut self, fd: RawFd) -> Result<(), MuxError> {
        // The token is the descriptor itself.
        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: fd as u64,
        };
        let rc = unsafe { epoll_ctl(self.epoll.as_raw_fd(), EPOLL_CTL_ADD, fd, &mut event) };
        call("epoll_ctl(EPOLL_CTL_ADD)", cvt(rc), setup_failed)?;
        Ok(())
    }
}

impl Backend for EpollBackend {
    fn name(&self) -> &'static str {
        "epoll"
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn admits(&self, _fd: RawFd) -> bool {
        true
    }

    fn register(&mut self, fd: RawFd, _slot: usize) -> Result<(), MuxError> {
        self.add(fd)
    }

    fn deregister(&mut self, fd: RawFd, _slot: usize) {
        let rc = unsafe {
            epoll_ctl(
                self.epoll.as_raw_fd(),
                EPOLL_CTL_DEL,
                fd,
                ptr::null_mut(),
            )
        };
        if let Err(e) = cvt(rc) {
            debug!(fd, error = %e, "epoll_ctl(EPOLL_CTL_DEL) failed");
        }
    }

    fn poll(&mut self, ready: &mut Vec<ReadyEvent>) -> Result<(), MuxError> {
        let rc = unsafe {
            epoll_wait(
                self.epoll.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                -1,
            )
        };
        let n = match cvt(rc) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            result => call("epoll_wait", result, poll_failed)?,
        };
        trace!(events = n, "epoll_wait returned");

        for ev in &self.events[..n as usize] {
            let fd = ev.u64 as RawFd;
            let flags = ev.events;

            if flags & EPOLLIN as u32 == 0 {
                ready.push(ReadyEvent::Other {
                    fd,
                    flags: flags as i32,
                });
            } else if fd == self.listener {
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
    use std::fs::File;
    use std::net::TcpListener;

    #[test]
    fn test_wait_on_non_epoll_descriptor_is_poll_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut backend = EpollBackend::new(listener.as_raw_fd(), 4).unwrap();
        backend.epoll = OwnedFd::from(File::open("/dev/null").unwrap());

        let mut ready = Vec::new();
        match backend.poll(&mut ready) {
            Err(MuxError::Poll { call, source }) => {
                assert_eq!(call, "epoll_wait");
                assert_eq!(source.raw_os_error(), Some(libc::EINVAL));
            }
            other => panic!("expected poll error, got {other:?}"),
        }
    }
}
