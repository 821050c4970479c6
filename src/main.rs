//! readiness-echo: a single-threaded TCP echo server
//!
//! Every message a client sends is answered with the same canned line.
//! The interesting part is the multiplexer underneath, which watches the
//! listener and all clients with one of three readiness backends:
//! - `select`: bitmask, value-result `fd_set`s
//! - `poll`: fixed-size `pollfd` array
//! - `queue`: kernel event queue (epoll / kqueue)
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod protocols;
mod runtime;

use clap::error::ErrorKind;
use config::{Config, ConfigError};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Usage(e))
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
        {
            e.exit()
        }
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        backend = ?config.backend,
        capacity = config.capacity,
        buffer_size = config.buffer_size,
        "Starting readiness-echo server"
    );

    // run() only comes back with a fatal error.
    if let Err(e) = runtime::run(config) {
        eprintln!("{e}");
    }
    ExitCode::FAILURE
}
