use std::env;

use camino::Utf8PathBuf;

/// Directory scanned by the host for `.spec` files on Unix platforms.
pub const UNIX_SPEC_DIR: &str = "/etc/docker/plugins";

/// Directory holding plugin sockets addressed by name on Unix platforms.
pub const UNIX_SOCKET_DIR: &str = "/run/docker/plugins";

/// Default input and output buffer size for named pipes, in bytes.
pub const DEFAULT_PIPE_BUFFER_SIZE: u32 = 4096;

/// Default log filter expression used by plugin binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by plugin binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for plugin binaries.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Data-root directory of the host daemon on Windows.
///
/// Resolves to `%ProgramData%\docker`. Returns `None` when `ProgramData` is
/// unset or not valid UTF-8.
#[must_use]
pub fn windows_default_daemon_root_dir() -> Option<Utf8PathBuf> {
    let program_data = env::var("ProgramData").ok()?;
    let mut dir = Utf8PathBuf::from(program_data);
    dir.push("docker");
    Some(dir)
}
