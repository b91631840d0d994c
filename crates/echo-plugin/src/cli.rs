//! Command-line arguments of the echo plugin.

use clap::Parser;

use plugin_sdk_config::{DEFAULT_LOG_FILTER, LogFormat, TransportConfig};

/// Serves an echo driver for exercising plugin hosts.
#[derive(Parser, Debug)]
#[command(name = "echo-plugin", version)]
pub(crate) struct Cli {
    /// Transport URL such as `unix://echo`, `tcp://127.0.0.1:8080?name=echo`
    /// or `npipe:////./pipe/echo?name=echo`.
    #[arg(long, env = "ECHO_PLUGIN_TRANSPORT", default_value = "unix://echo")]
    pub(crate) transport: TransportConfig,
    /// Tracing filter directives.
    #[arg(long, env = "ECHO_PLUGIN_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub(crate) log_filter: String,
    /// Log output format.
    #[arg(long, env = "ECHO_PLUGIN_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    pub(crate) log_format: LogFormat,
}
