//! Event-queue backend.
//!
//! The kernel keeps the interest registry, so this backend only has to
//! mirror the connection table with explicit register/deregister calls and
//! gets back a compact list of ready descriptors per wait. Read interest is
//! level-triggered: data left unread after one echo is reported again on
//! the next turn.
//!
//! Linux uses `epoll`, macOS uses `kqueue`.

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "macos")]
mod kqueue;

#[cfg(target_os = "linux")]
pub type QueueBackend = epoll::EpollBackend;

#[cfg(target_os = "macos")]
pub type QueueBackend = kqueue::KqueueBackend;
