//! macOS `kqueue` event queue.
//!
//! Filters are added without `EV_CLEAR`, which keeps them level-triggered
//! like the other backends.

use crate::runtime::error::{call, cvt, poll_failed, setup_failed, MuxError};
use crate::runtime::{Backend, ReadyEvent};
use libc::{kevent, kqueue, EVFILT_READ, EV_ADD, EV_DELETE, EV_ENABLE, EV_ERROR};
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use tracing::{debug, trace};

pub struct KqueueBackend {
    kqueue: OwnedFd,
    listener: RawFd,
    /// Output buffer for `kevent`, rewritten by every call.
    events: Vec<libc::kevent>,
}

fn read_filter(fd: RawFd, flags: u16) -> libc::kevent {
    libc::kevent {
        ident: fd as usize,
        filter: EVFILT_READ,
        flags,
        fflags: 0,
        data: 0,
        udata: ptr::null_mut(),
    }
}

impl KqueueBackend {
    /// Create the kqueue and register the listener.
    pub fn new(listener: RawFd, max_events: usize) -> Result<Self, MuxError> {
        let fd = call("kqueue", cvt(unsafe { kqueue() }), setup_failed)?;
        let kqueue = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut backend = Self {
            kqueue,
            listener,
            events: vec![unsafe { mem::zeroed() }; max_events],
        };
        backend
            .change(read_filter(listener, EV_ADD | EV_ENABLE))
            .map_err(|e| setup_failed("kevent(EV_ADD)", e))?;
        Ok(backend)
    }

    fn change(&mut self, change: libc::kevent) -> io::Result<()> {
        let rc = unsafe {
            kevent(
                self.kqueue.as_raw_fd(),
                &change,
                1,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        cvt(rc).map(|_| ())
    }
}

impl Backend for KqueueBackend {
    fn name(&self) -> &'static str {
        "kqueue"
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn admits(&self, _fd: RawFd) -> bool {
        true
    }

    fn register(&mut self, fd: RawFd, _slot: usize) -> Result<(), MuxError> {
        let result = self.change(read_filter(fd, EV_ADD | EV_ENABLE));
        call("kevent(EV_ADD)", result, setup_failed)
    }

    fn deregister(&mut self, fd: RawFd, _slot: usize) {
        if let Err(e) = self.change(read_filter(fd, EV_DELETE)) {
            debug!(fd, error = %e, "kevent(EV_DELETE) failed");
        }
    }

    fn poll(&mut self, ready: &mut Vec<ReadyEvent>) -> Result<(), MuxError> {
        let rc = unsafe {
            kevent(
                self.kqueue.as_raw_fd(),
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                ptr::null(),
            )
        };
        let n = match cvt(rc) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            result => call("kevent", result, poll_failed)?,
        };
        trace!(events = n, "kevent returned");

        for ev in &self.events[..n as usize] {
            let fd = ev.ident as RawFd;

            if ev.filter != EVFILT_READ || ev.flags & EV_ERROR != 0 {
                ready.push(ReadyEvent::Other {
                    fd,
                    flags: i32::from(ev.flags),
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
