//! Readiness-driven connection multiplexer.
//!
//! One thread, one blocking readiness call per turn. Three interchangeable
//! backends sit behind the [`Backend`] trait:
//! - `select`: bitmask backend over `select(2)`
//! - `poll`: fixed-array backend over `poll(2)`
//! - `queue`: kernel event queue (epoll on Linux, kqueue on macOS)
//!
//! All of them share:
//! - `Listener`: the bound, non-blocking listening socket
//! - `ConnectionTable`: slot registry owning every client socket
//! - `EventLoop`: accept-or-echo dispatch over the ready set

mod connection;
mod error;
mod event_loop;
mod listener;
mod poll;
mod queue;
mod select;
#[cfg(test)]
pub(crate) mod test_util;

pub(crate) use connection::{CapacityExceeded, Connection, ConnectionTable};
pub use error::MuxError;
pub(crate) use event_loop::EventLoop;
pub(crate) use listener::{ignore_sigpipe, Listener};
pub(crate) use poll::PollBackend;
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub(crate) use queue::QueueBackend;
pub(crate) use select::SelectBackend;

use crate::config::{BackendType, Config};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::info;

/// One entry of the ready set produced by a backend poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyEvent {
    /// The listener has a pending connection.
    Accept,
    /// A client descriptor can be read without blocking, or hit EOF/error.
    Readable(RawFd),
    /// Some other condition was reported. Logged and skipped.
    Other { fd: RawFd, flags: i32 },
}

/// A readiness notification strategy.
///
/// A backend keeps its own mirror of the connection table. The event loop
/// calls `register` in the same step as inserting into the table and
/// `deregister` in the same step as removing, before the socket closes.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Client slots the backend can watch, `None` if unbounded.
    fn capacity(&self) -> Option<usize>;

    /// Whether this descriptor can be watched at all.
    fn admits(&self, fd: RawFd) -> bool;

    fn register(&mut self, fd: RawFd, slot: usize) -> Result<(), MuxError>;

    fn deregister(&mut self, fd: RawFd, slot: usize);

    /// Block until at least one watched descriptor is ready and append the
    /// ready set to `ready`.
    ///
    /// An interrupted wait returns `Ok` with nothing appended.
    fn poll(&mut self, ready: &mut Vec<ReadyEvent>) -> Result<(), MuxError>;
}

/// Run the server with the configured backend. Only returns on failure.
pub fn run(config: Config) -> Result<(), MuxError> {
    ignore_sigpipe()?;

    let listener = Listener::bind(config.listen_addr(), config.backlog)?;
    let fd = listener.as_raw_fd();
    let addr = listener
        .local_addr()
        .map_err(|e| error::setup_failed("getsockname", e))?;

    info!(
        addr = %addr,
        backend = ?config.backend,
        "Server is listening"
    );

    match config.backend {
        BackendType::Select => {
            EventLoop::new(listener, SelectBackend::new(fd)?, config.buffer_size).run()
        }
        BackendType::Poll => EventLoop::new(
            listener,
            PollBackend::new(fd, config.capacity),
            config.buffer_size,
        )
        .run(),
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        BackendType::Queue => EventLoop::new(
            listener,
            QueueBackend::new(fd, config.max_events)?,
            config.buffer_size,
        )
        .run(),
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        BackendType::Queue => Err(MuxError::Setup {
            call: "event queue",
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "Unsupported platform: only Linux and macOS have an event queue",
            ),
        }),
    }
}
