//! Fixed-array backend built on `poll(2)`.
//!
//! The `pollfd` array has `capacity + 1` entries. Entry 0 is the listener;
//! entry `slot + 1` mirrors connection table slot `slot`. Empty entries
//! carry a negative descriptor, which `poll` skips.
//!
//! Readiness is reported in place through `revents`, so every call is
//! followed by a linear scan over the whole array: O(capacity) per turn no
//! matter how many clients are connected.

use crate::runtime::error::{call, cvt, poll_failed, MuxError};
use crate::runtime::{Backend, ReadyEvent};
use std::io;
use std::os::unix::io::RawFd;
use tracing::trace;

const LISTENER_ENTRY: usize = 0;

fn vacant() -> libc::pollfd {
    libc::pollfd {
        fd: -1,
        events: libc::POLLIN,
        revents: 0,
    }
}

pub struct PollBackend {
    entries: Vec<libc::pollfd>,
}

impl PollBackend {
    /// Create a backend with room for `capacity` clients.
    pub fn new(listener: RawFd, capacity: usize) -> Self {
        let mut entries = vec![vacant(); capacity + 1];
        entries[LISTENER_ENTRY].fd = listener;
        Self { entries }
    }

    /// Descriptor watched for a table slot, if the slot is occupied.
    #[cfg(test)]
    pub fn watched(&self, slot: usize) -> Option<RawFd> {
        self.entries
            .get(slot + 1)
            .map(|entry| entry.fd)
            .filter(|fd| *fd >= 0)
    }
}

impl Backend for PollBackend {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.entries.len() - 1)
    }

    fn admits(&self, _fd: RawFd) -> bool {
        true
    }

    fn register(&mut self, fd: RawFd, slot: usize) -> Result<(), MuxError> {
        let entry = &mut self.entries[slot + 1];
        debug_assert!(entry.fd < 0, "slot {slot} already watched");
        entry.fd = fd;
        entry.revents = 0;
        Ok(())
    }

    fn deregister(&mut self, _fd: RawFd, slot: usize) {
        self.entries[slot + 1] = vacant();
    }

    fn poll(&mut self, ready: &mut Vec<ReadyEvent>) -> Result<(), MuxError> {
        for entry in &mut self.entries {
            entry.revents = 0;
        }

        let rc = unsafe {
            libc::poll(
                self.entries.as_mut_ptr(),
                self.entries.len() as libc::nfds_t,
                -1,
            )
        };
        let n = match cvt(rc) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            result => call("poll", result, poll_failed)?,
        };
        trace!(entries = self.entries.len(), ready = n, "poll returned");

        for (i, entry) in self.entries.iter().enumerate() {
            if entry.revents & libc::POLLIN == 0 {
                if entry.revents != 0 {
                    // POLLNVAL here means a closed descriptor was left in the array.
                    ready.push(ReadyEvent::Other {
                        fd: entry.fd,
                        flags: i32::from(entry.revents),
                    });
                }
                continue;
            }

            if i == LISTENER_ENTRY {
                ready.push(ReadyEvent::Accept);
            } else {
                ready.push(ReadyEvent::Readable(entry.fd));
            }
        }

        Ok(())
    }
}
