//! Entry point for the echo plugin binary.

use std::io::{self, StderrLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    echo_plugin::run(std::env::args_os(), &mut stderr)
}
