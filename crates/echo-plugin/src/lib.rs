//! A minimal plugin serving a single `EchoDriver`.
//!
//! The plugin returns every JSON body posted to `/EchoDriver.Echo` unchanged.
//! It is useful for checking that a host can discover, activate and call a
//! plugin over each supported transport.

mod cli;
mod driver;
mod shutdown;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info};

use plugin_sdk::{PluginServer, ServeError, TelemetryError, telemetry};

pub use self::driver::{DRIVER_NAME, ECHO_PATH, register};
pub use self::shutdown::ShutdownError;

use self::cli::Cli;
use self::shutdown::spawn_signal_listener;

const MAIN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::main");

/// Failures that end the plugin process.
#[derive(Debug, Error)]
pub enum RunError {
    /// Telemetry could not be configured.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// Signal handlers could not be installed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// The server failed to provision or accept.
    #[error(transparent)]
    Serve(#[from] ServeError),
}

/// Parses `args`, serves the echo driver and reports the outcome.
///
/// Failures before telemetry is available are written to `stderr`; later
/// failures are logged.
pub fn run<I, W>(args: I, stderr: &mut W) -> ExitCode
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
    W: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(parse_error) => {
            let code = parse_error.exit_code();
            if parse_error.use_stderr() {
                drop(write!(stderr, "{parse_error}"));
            } else {
                drop(parse_error.print());
            }
            return if code == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
        }
    };

    if let Err(telemetry_error) = telemetry::initialise(&cli.log_filter, cli.log_format) {
        drop(writeln!(stderr, "echo-plugin: {telemetry_error}"));
        return ExitCode::FAILURE;
    }

    match serve(&cli) {
        Ok(()) => {
            info!(target: MAIN_TARGET, "echo plugin stopped");
            ExitCode::SUCCESS
        }
        Err(run_error) => {
            error!(target: MAIN_TARGET, error = %run_error, "echo plugin failed");
            ExitCode::FAILURE
        }
    }
}

fn serve(cli: &Cli) -> Result<(), RunError> {
    let mut server = PluginServer::new();
    register(&mut server);
    spawn_signal_listener(&server.shutdown_handle())?;
    info!(
        target: MAIN_TARGET,
        transport = %cli.transport,
        "starting echo plugin"
    );
    server.serve_config(&cli.transport)?;
    Ok(())
}
