//! Canned-reply echo protocol.
//!
//! There is no framing: every read that yields at least one byte is
//! answered with the same fixed line, whatever the client sent and however
//! many bytes arrived.
//!
//! ```text
//! Request:  ping
//! Response: Hello stranger! Thanks for the message!\n
//! ```
//!
//! EOF or a read error closes the connection without a reply.

pub mod handler;

pub use handler::{EchoHandler, Outcome, RESPONSE};
