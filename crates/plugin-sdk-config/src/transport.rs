use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Url, form_urlencoded};

use crate::defaults::DEFAULT_PIPE_BUFFER_SIZE;

const NPIPE_PREFIX: &str = "npipe://";

/// Declarative configuration for the transport a plugin listens on.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportConfig {
    /// TCP socket, optionally wrapped in TLS by the caller.
    Tcp {
        /// `host:port` to bind; port `0` picks an ephemeral port.
        address: String,
        /// Plugin name used for the discovery spec file.
        plugin_name: String,
        /// Data-root directory of the host daemon. Only consulted on Windows.
        #[serde(default)]
        daemon_dir: Option<Utf8PathBuf>,
    },
    /// Unix domain socket.
    Unix {
        /// Absolute socket path, or a bare plugin name resolved under the
        /// conventional plugin socket directory.
        address: String,
        /// Group granted access to the socket.
        #[serde(default)]
        gid: Option<u32>,
    },
    /// Windows named pipe.
    NamedPipe {
        /// Pipe path such as `//./pipe/my-plugin`.
        address: String,
        /// Plugin name used for the discovery spec file.
        plugin_name: String,
        /// Data-root directory of the host daemon.
        #[serde(default)]
        daemon_dir: Option<Utf8PathBuf>,
        /// Pipe creation parameters.
        #[serde(default)]
        pipe: PipeConfig,
    },
}

impl TransportConfig {
    /// Builds a TCP transport.
    #[must_use]
    pub fn tcp(address: impl Into<String>, plugin_name: impl Into<String>) -> Self {
        Self::Tcp {
            address: address.into(),
            plugin_name: plugin_name.into(),
            daemon_dir: None,
        }
    }

    /// Builds a Unix domain socket transport.
    #[must_use]
    pub fn unix(address: impl Into<String>) -> Self {
        Self::Unix {
            address: address.into(),
            gid: None,
        }
    }

    /// Builds a named pipe transport with default pipe parameters.
    #[must_use]
    pub fn named_pipe(address: impl Into<String>, plugin_name: impl Into<String>) -> Self {
        Self::NamedPipe {
            address: address.into(),
            plugin_name: plugin_name.into(),
            daemon_dir: None,
            pipe: PipeConfig::default(),
        }
    }

    /// Sets the daemon data-root directory. Ignored for Unix sockets.
    #[must_use]
    pub fn with_daemon_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        match &mut self {
            Self::Tcp { daemon_dir, .. } | Self::NamedPipe { daemon_dir, .. } => {
                *daemon_dir = Some(dir.into());
            }
            Self::Unix { .. } => {}
        }
        self
    }

    /// Sets the socket group. Ignored for TCP and named pipes.
    #[must_use]
    pub fn with_gid(mut self, group: u32) -> Self {
        if let Self::Unix { gid, .. } = &mut self {
            *gid = Some(group);
        }
        self
    }

    /// Replaces the pipe parameters. Ignored for TCP and Unix sockets.
    #[must_use]
    pub fn with_pipe_config(mut self, config: PipeConfig) -> Self {
        if let Self::NamedPipe { pipe, .. } = &mut self {
            *pipe = config;
        }
        self
    }

    /// URL scheme naming the transport kind.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Unix { .. } => "unix",
            Self::NamedPipe { .. } => "npipe",
        }
    }

    /// Configured address, before any resolution.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::Tcp { address, .. }
            | Self::Unix { address, .. }
            | Self::NamedPipe { address, .. } => address,
        }
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}://{}", self.scheme(), self.address())
    }
}

impl FromStr for TransportConfig {
    type Err = TransportParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = input.strip_prefix(NPIPE_PREFIX) {
            return parse_named_pipe(input, rest);
        }

        let url = Url::parse(input)?;
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| TransportParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| TransportParseError::MissingPort(input.to_owned()))?;
                let plugin_name = required_name(input, &query)?;
                let mut config = Self::tcp(format!("{host}:{port}"), plugin_name);
                if let Some(dir) = query.get("daemon_dir") {
                    config = config.with_daemon_dir(dir.as_str());
                }
                Ok(config)
            }
            "unix" => {
                let host = url.host_str().unwrap_or_default();
                let path = url.path();
                let address = match (host.is_empty(), path.is_empty()) {
                    (false, true) => host,
                    (true, false) => path,
                    _ => return Err(TransportParseError::MissingUnixPath(input.to_owned())),
                };
                let mut config = Self::unix(address);
                if let Some(gid) = query.get("gid") {
                    config = config.with_gid(parse_number("gid", gid)?);
                }
                Ok(config)
            }
            other => Err(TransportParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

// Pipe paths (`//./pipe/name`) do not survive URL normalisation, so the
// address is split off by hand and only the query goes through form decoding.
fn parse_named_pipe(input: &str, rest: &str) -> Result<TransportConfig, TransportParseError> {
    let (address, raw_query) = rest.split_once('?').unwrap_or((rest, ""));
    if address.is_empty() {
        return Err(TransportParseError::MissingPipePath(input.to_owned()));
    }
    let query: HashMap<String, String> = form_urlencoded::parse(raw_query.as_bytes())
        .into_owned()
        .collect();
    let plugin_name = required_name(input, &query)?;

    let mut pipe = PipeConfig::default();
    if let Some(descriptor) = query.get("sddl") {
        pipe.security_descriptor = Some(descriptor.clone());
    }
    if let Some(size) = query.get("in_buffer_size") {
        pipe.in_buffer_size = parse_number("in_buffer_size", size)?;
    }
    if let Some(size) = query.get("out_buffer_size") {
        pipe.out_buffer_size = parse_number("out_buffer_size", size)?;
    }

    let mut config = TransportConfig::named_pipe(address, plugin_name).with_pipe_config(pipe);
    if let Some(dir) = query.get("daemon_dir") {
        config = config.with_daemon_dir(dir.as_str());
    }
    Ok(config)
}

fn required_name<'a>(
    input: &str,
    query: &'a HashMap<String, String>,
) -> Result<&'a str, TransportParseError> {
    query
        .get("name")
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| TransportParseError::MissingPluginName(input.to_owned()))
}

fn parse_number(parameter: &'static str, value: &str) -> Result<u32, TransportParseError> {
    value
        .parse()
        .map_err(|_| TransportParseError::InvalidNumber {
            parameter,
            value: value.to_owned(),
        })
}

/// Parameters used when creating a named pipe.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipeConfig {
    /// SDDL security descriptor applied to the pipe. `None` keeps the
    /// default descriptor of the creating process.
    pub security_descriptor: Option<String>,
    /// Size of the inbound buffer in bytes.
    pub in_buffer_size: u32,
    /// Size of the outbound buffer in bytes.
    pub out_buffer_size: u32,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            security_descriptor: None,
            in_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
            out_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
        }
    }
}

/// Errors encountered while parsing a [`TransportConfig`] from text.
#[derive(Debug, Error)]
pub enum TransportParseError {
    /// Scheme was not recognised.
    #[error("unsupported transport scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing from the address.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Unix socket path or plugin name was absent or ambiguous.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// Named pipe path was absent.
    #[error("missing named pipe path in '{0}'")]
    MissingPipePath(String),
    /// The `name` query parameter required for spec files was absent.
    #[error("missing plugin name (`?name=`) in '{0}'")]
    MissingPluginName(String),
    /// A numeric query parameter did not parse.
    #[error("invalid value '{value}' for '{parameter}'")]
    InvalidNumber {
        /// Query parameter name.
        parameter: &'static str,
        /// Raw value supplied.
        value: String,
    },
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
