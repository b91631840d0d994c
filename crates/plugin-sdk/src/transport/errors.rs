//! Error types for listener provisioning.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced while provisioning or preparing a plugin listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The TCP address could not be resolved.
    #[error("failed to resolve TCP address {address}: {source}")]
    Resolve {
        /// Address as configured.
        address: String,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// The TCP address resolved to nothing.
    #[error("no TCP addresses resolved for {address}")]
    ResolveEmpty {
        /// Address as configured.
        address: String,
    },
    /// Binding the TCP socket failed, typically because the port is taken.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Resolved socket address.
        addr: SocketAddr,
        /// Bind error.
        #[source]
        source: io::Error,
    },
    /// The listener could not be registered with the async runtime.
    #[error("failed to register listener {endpoint}: {source}")]
    Register {
        /// Listener endpoint URL.
        endpoint: String,
        /// Registration error.
        #[source]
        source: io::Error,
    },
    /// Unix sockets were requested on a platform without them.
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported for address {address}")]
    UnsupportedUnix {
        /// Address as configured.
        address: String,
    },
    /// Creating the socket directory failed.
    #[cfg(unix)]
    #[error("failed to create socket directory {path}: {source}")]
    SocketDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Filesystem error.
        #[source]
        source: io::Error,
    },
    /// Binding the Unix socket failed.
    #[cfg(unix)]
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: String,
        /// Bind error.
        #[source]
        source: io::Error,
    },
    /// Another process is already serving on the socket path.
    #[cfg(unix)]
    #[error("existing unix socket {path} is already in use")]
    UnixInUse {
        /// Socket path.
        path: String,
    },
    /// The socket path is occupied by something other than a socket.
    #[cfg(unix)]
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket {
        /// Socket path.
        path: String,
    },
    /// Reading metadata of an existing socket path failed.
    #[cfg(unix)]
    #[error("failed to read metadata for unix socket {path}: {source}")]
    UnixMetadata {
        /// Socket path.
        path: String,
        /// Filesystem error.
        #[source]
        source: io::Error,
    },
    /// Probing an existing socket failed with an unexpected error.
    #[cfg(unix)]
    #[error("failed to connect to existing unix socket {path}: {source}")]
    UnixConnect {
        /// Socket path.
        path: String,
        /// Connection error.
        #[source]
        source: io::Error,
    },
    /// Removing a stale socket file failed.
    #[cfg(unix)]
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        /// Socket path.
        path: String,
        /// Filesystem error.
        #[source]
        source: io::Error,
    },
    /// Handing the socket to the configured group failed.
    #[cfg(unix)]
    #[error("failed to change group of unix socket {path} to {gid}: {source}")]
    UnixOwnership {
        /// Socket path.
        path: String,
        /// Requested group id.
        gid: u32,
        /// System error.
        #[source]
        source: nix::Error,
    },
    /// Restricting socket permissions failed.
    #[cfg(unix)]
    #[error("failed to set permissions on unix socket {path}: {source}")]
    UnixPermissions {
        /// Socket path.
        path: String,
        /// Filesystem error.
        #[source]
        source: io::Error,
    },
    /// Named pipes were requested on a platform without them.
    #[cfg(not(windows))]
    #[error("named pipes are unsupported for address {address}")]
    UnsupportedPipe {
        /// Address as configured.
        address: String,
    },
    /// The pipe security descriptor did not parse.
    #[cfg(windows)]
    #[error("invalid security descriptor for pipe {address}: {source}")]
    PipeSecurity {
        /// Pipe address.
        address: String,
        /// System error.
        #[source]
        source: io::Error,
    },
    /// Creating the named pipe failed, typically because it already exists.
    #[cfg(windows)]
    #[error("failed to create named pipe {address}: {source}")]
    CreatePipe {
        /// Pipe address.
        address: String,
        /// System error.
        #[source]
        source: io::Error,
    },
    /// The daemon data-root directory is missing or unknown.
    #[error("daemon root directory {path} must already exist")]
    DaemonRootMissing {
        /// Directory that was expected.
        path: PathBuf,
    },
    /// Creating the spec directory failed.
    #[error("failed to create plugin spec directory {path}: {source}")]
    SpecDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Filesystem error.
        #[source]
        source: io::Error,
    },
    /// Writing the spec file failed.
    #[error("failed to write plugin spec file {path}: {source}")]
    SpecWrite {
        /// Spec file path.
        path: PathBuf,
        /// Filesystem error.
        #[source]
        source: io::Error,
    },
}
