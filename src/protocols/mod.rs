//! Protocol implementations.
//!
//! - `echo`: canned-reply echo service driven by the runtime event loop

pub mod echo;
