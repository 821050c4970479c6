//! Error taxonomy for the multiplexer.
//!
//! Every failure that escapes the event loop is fatal to the process.
//! Per-connection read/write failures never become a `MuxError`; they only
//! close the connection they happened on.

use std::fmt;
use std::io;
use tracing::trace;

/// Fatal multiplexer error.
#[derive(Debug)]
pub enum MuxError {
    /// Listener or readiness-registry setup failed before or while serving.
    Setup {
        call: &'static str,
        source: io::Error,
    },
    /// The blocking readiness call failed for a reason other than `EINTR`.
    Poll {
        call: &'static str,
        source: io::Error,
    },
    /// `accept(2)` on the listener failed.
    Accept(io::Error),
}

impl MuxError {
    pub fn call(&self) -> &'static str {
        match self {
            MuxError::Setup { call, .. } | MuxError::Poll { call, .. } => call,
            MuxError::Accept(_) => "accept",
        }
    }

    fn source_error(&self) -> &io::Error {
        match self {
            MuxError::Setup { source, .. } | MuxError::Poll { source, .. } => source,
            MuxError::Accept(source) => source,
        }
    }
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\tError: {}", self.call(), self.source_error())
    }
}

impl std::error::Error for MuxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source_error())
    }
}

/// Convert a raw libc return code into an `io::Result`.
///
/// Negative values are turned into the current `errno`.
pub(crate) fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Record the outcome of a system call.
///
/// Success is traced with the call name; failure is handed back to the
/// caller wrapped by `wrap`, which decides how fatal it is.
pub(crate) fn call<T: fmt::Debug>(
    name: &'static str,
    result: io::Result<T>,
    wrap: fn(&'static str, io::Error) -> MuxError,
) -> Result<T, MuxError> {
    match result {
        Ok(value) => {
            trace!(call = name, result = ?value, "[CALL]");
            Ok(value)
        }
        Err(e) => Err(wrap(name, e)),
    }
}

pub(crate) fn setup_failed(call: &'static str, source: io::Error) -> MuxError {
    MuxError::Setup { call, source }
}

pub(crate) fn poll_failed(call: &'static str, source: io::Error) -> MuxError {
    MuxError::Poll { call, source }
}
