//! Turns termination signals into a server shutdown.

use std::io;

use thiserror::Error;
use tracing::info;

use plugin_sdk::ShutdownHandle;

const SHUTDOWN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::shutdown");

/// Errors reported while installing the signal listener.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The listener thread could not be spawned.
    #[error("failed to spawn signal listener thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Requests shutdown through `handle` on the first `SIGINT` or `SIGTERM`.
#[cfg(unix)]
pub(crate) fn spawn_signal_listener(handle: &ShutdownHandle) -> Result<(), ShutdownError> {
    use std::thread;

    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let handle = handle.clone();

    let mut signals =
        Signals::new([SIGTERM, SIGINT]).map_err(|source| ShutdownError::Install { source })?;
    thread::Builder::new()
        .name("signal-listener".to_owned())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(target: SHUTDOWN_TARGET, signal, "shutdown signal received");
                handle.shutdown();
            }
        })
        .map_err(|source| ShutdownError::Spawn { source })?;
    Ok(())
}

/// Signals are not wired up on this platform; the process stops when killed.
#[cfg(not(unix))]
pub(crate) fn spawn_signal_listener(_handle: &ShutdownHandle) -> Result<(), ShutdownError> {
    info!(
        target: SHUTDOWN_TARGET,
        "signal-driven shutdown is unavailable on this platform"
    );
    Ok(())
}
