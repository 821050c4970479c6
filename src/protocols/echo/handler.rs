//! Echo handler driven by the event loop.

use std::io::{self, Read, Write};
use tracing::{debug, trace};

/// Reply written for every non-empty read.
pub const RESPONSE: &[u8] = b"Hello stranger! Thanks for the message!\n";

/// What the event loop should do with the connection afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    CloseRequested,
}

/// Reads once per readiness event and answers with [`RESPONSE`].
pub struct EchoHandler {
    buffer: Vec<u8>,
}

impl EchoHandler {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer: vec![0u8; buffer_size],
        }
    }

    /// Service one readiness event.
    ///
    /// Exactly one read is issued. Bytes left in the socket are picked up
    /// on a later turn since every backend is level-triggered.
    pub fn handle<S: Read + Write>(&mut self, stream: &mut S) -> Outcome {
        let n = match stream.read(&mut self.buffer) {
            Ok(0) => return Outcome::CloseRequested,
            Ok(n) => n,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return Outcome::Continue;
            }
            Err(e) => {
                debug!(error = %e, "Read failed");
                return Outcome::CloseRequested;
            }
        };

        trace!(
            bytes = n,
            data = %String::from_utf8_lossy(&self.buffer[..n]),
            "Received message"
        );

        // A failed write leaves the connection open; if the peer is gone
        // the next read reports it.
        if let Err(e) = stream.write_all(RESPONSE) {
            debug!(error = %e, "Write failed");
        }

        Outcome::Continue
    }
}
