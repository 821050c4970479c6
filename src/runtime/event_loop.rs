//! Single-threaded accept-or-echo event loop.
//!
//! Each turn is one blocking `poll` on the backend followed by dispatch of
//! every ready event it reported, in the order the backend reported them.
//! Nothing else ever touches the connection table, so it needs no locking.

use crate::protocols::echo::{EchoHandler, Outcome};
use crate::runtime::{
    Backend, CapacityExceeded, Connection, ConnectionTable, Listener, MuxError, ReadyEvent,
};
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, info, trace, warn};

pub struct EventLoop<B: Backend> {
    listener: Listener,
    table: ConnectionTable,
    backend: B,
    handler: EchoHandler,
    /// Ready set of the current turn, kept to reuse its allocation.
    ready: Vec<ReadyEvent>,
}

impl<B: Backend> EventLoop<B> {
    /// Build a loop around a listener the backend is already watching.
    pub fn new(listener: Listener, backend: B, buffer_size: usize) -> Self {
        let table = ConnectionTable::new(backend.capacity());
        Self {
            listener,
            table,
            backend,
            handler: EchoHandler::new(buffer_size),
            ready: Vec::new(),
        }
    }

    /// Turn forever. Returns only on a fatal error.
    pub fn run(&mut self) -> Result<(), MuxError> {
        info!(
            backend = self.backend.name(),
            capacity = ?self.table.capacity(),
            "Event loop started"
        );
        loop {
            self.turn()?;
        }
    }

    /// Poll once and dispatch everything that was reported ready.
    pub fn turn(&mut self) -> Result<(), MuxError> {
        let mut ready = mem::take(&mut self.ready);
        ready.clear();

        self.backend.poll(&mut ready)?;
        trace!(
            backend = self.backend.name(),
            ready = ready.len(),
            "Dispatching ready set"
        );

        let result = ready.iter().try_for_each(|event| self.dispatch(*event));
        self.ready = ready;
        result
    }

    fn dispatch(&mut self, event: ReadyEvent) -> Result<(), MuxError> {
        match event {
            ReadyEvent::Accept => self.accept()?,
            ReadyEvent::Readable(fd) => self.service(fd),
            ReadyEvent::Other { fd, flags } => {
                debug!(fd, flags, "Ignoring non-readable event");
            }
        }
        Ok(())
    }

    fn accept(&mut self) -> Result<(), MuxError> {
        debug!("Accepting new incoming connection");
        let Some((stream, peer)) = self.listener.accept()? else {
            return Ok(());
        };
        let fd = stream.as_raw_fd();

        if !self.backend.admits(fd) {
            warn!(
                fd,
                backend = self.backend.name(),
                "Descriptor out of backend range, closing"
            );
            return Ok(());
        }

        let slot = match self.table.insert(Connection::new(stream, peer)) {
            Ok(slot) => slot,
            Err(CapacityExceeded(conn)) => {
                warn!(
                    fd,
                    peer = %conn.peer,
                    capacity = ?self.table.capacity(),
                    "Connection limit reached, closing"
                );
                return Ok(());
            }
        };

        if let Err(e) = self.backend.register(fd, slot) {
            self.table.remove(fd);
            return Err(e);
        }

        debug!(fd, slot, peer = %peer, "Accepted connection");
        Ok(())
    }

    fn service(&mut self, fd: RawFd) {
        // A descriptor closed earlier in this turn may still be in the
        // ready set; its number can even belong to a fresh connection, which
        // then just sees a spurious wakeup.
        let Some(conn) = self.table.get_mut(fd) else {
            trace!(fd, "Skipping descriptor no longer in table");
            return;
        };

        debug!(fd, "Receiving data from the client");
        if self.handler.handle(&mut conn.stream) == Outcome::CloseRequested {
            self.close(fd);
        }
    }

    /// Remove, deregister and close in one step.
    fn close(&mut self, fd: RawFd) {
        if let Some((slot, conn)) = self.table.remove(fd) {
            self.backend.deregister(fd, slot);
            debug!(
                fd,
                slot,
                peer = %conn.peer,
                remaining = self.table.len(),
                "Closing connection"
            );
            drop(conn);
        }
    }

    #[cfg(test)]
    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}
