//! Shared configuration types for plugin processes.
//!
//! A plugin is reached by its host over exactly one transport: a TCP socket,
//! a Unix domain socket or a Windows named pipe. [`TransportConfig`] captures
//! that choice together with the transport-specific parameters, and can be
//! parsed from (and printed as) the URL form hosts use in discovery files.

mod defaults;
mod logging;
mod transport;

pub use self::defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_PIPE_BUFFER_SIZE, UNIX_SOCKET_DIR, UNIX_SPEC_DIR,
    default_log_filter, default_log_format, windows_default_daemon_root_dir,
};
pub use self::logging::{LogFormat, LogFormatParseError};
pub use self::transport::{PipeConfig, TransportConfig, TransportParseError};
