//! Listener implementation for plugin transports.

use std::fmt;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

#[cfg(feature = "tls")]
use std::sync::Arc;

use super::{Incoming, ListenerError};

#[cfg(unix)]
use super::LISTENER_TARGET;
#[cfg(unix)]
use tracing::debug;

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::io;
#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd};
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

#[cfg(windows)]
use plugin_sdk_config::PipeConfig;

#[cfg(windows)]
use super::pipe::PipeListener;

/// A bound endpoint the plugin server accepts host connections on.
///
/// Listeners are normally produced by a
/// [`ListenerProvisioner`](crate::ListenerProvisioner), but can be bound
/// directly when the caller manages discovery itself.
#[derive(Debug)]
pub struct PluginListener {
    endpoint: String,
    kind: ListenerKind,
}

enum ListenerKind {
    Tcp {
        listener: TcpListener,
        #[cfg(feature = "tls")]
        tls: Option<Arc<rustls::ServerConfig>>,
    },
    #[cfg(unix)]
    Unix(UnixListener),
    #[cfg(windows)]
    Pipe(PipeListener),
}

impl fmt::Debug for ListenerKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { listener, .. } => formatter.debug_tuple("Tcp").field(listener).finish(),
            #[cfg(unix)]
            Self::Unix(listener) => formatter.debug_tuple("Unix").field(listener).finish(),
            #[cfg(windows)]
            Self::Pipe(listener) => formatter.debug_tuple("Pipe").field(listener).finish(),
        }
    }
}

impl PluginListener {
    /// Binds a TCP listener. Port `0` selects an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns an error when the address does not resolve or cannot be bound.
    pub fn bind_tcp(address: &str) -> Result<Self, ListenerError> {
        let listener = bind_tcp(address)?;
        let endpoint = listener
            .local_addr()
            .map_or_else(|_| format!("tcp://{address}"), |addr| format!("tcp://{addr}"));
        Ok(Self {
            endpoint,
            kind: ListenerKind::Tcp {
                listener,
                #[cfg(feature = "tls")]
                tls: None,
            },
        })
    }

    /// Serves TLS on a TCP listener. Has no effect on other listener kinds.
    #[cfg(feature = "tls")]
    #[must_use]
    pub fn with_tls(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        if let ListenerKind::Tcp { tls, .. } = &mut self.kind {
            *tls = Some(config);
        }
        self
    }

    /// Binds a Unix domain socket, replacing a stale socket file left behind
    /// by a previous process.
    ///
    /// # Errors
    ///
    /// Returns an error when a live server already owns the path, the path is
    /// not a socket, or binding fails.
    #[cfg(unix)]
    pub fn bind_unix(path: &Path) -> Result<Self, ListenerError> {
        let listener = bind_unix(path)?;
        Ok(Self {
            endpoint: format!("unix://{}", path.display()),
            kind: ListenerKind::Unix(listener),
        })
    }

    /// Creates a named pipe and its first instance.
    ///
    /// # Errors
    ///
    /// Returns an error when the security descriptor is invalid or the pipe
    /// already exists.
    #[cfg(windows)]
    pub fn bind_pipe(address: &str, config: &PipeConfig) -> Result<Self, ListenerError> {
        let listener = PipeListener::bind(address, config)?;
        Ok(Self {
            endpoint: format!("npipe://{address}"),
            kind: ListenerKind::Pipe(listener),
        })
    }

    /// URL of the endpoint, e.g. `tcp://127.0.0.1:41234`.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Bound socket address for TCP listeners.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.kind {
            ListenerKind::Tcp { listener, .. } => listener.local_addr().ok(),
            #[cfg(unix)]
            ListenerKind::Unix(_) => None,
            #[cfg(windows)]
            ListenerKind::Pipe(_) => None,
        }
    }

    /// Registers the listener with the current async runtime.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn into_incoming(self) -> Result<Incoming, ListenerError> {
        let Self { endpoint, kind } = self;
        let registered = match kind {
            ListenerKind::Tcp {
                listener,
                #[cfg(feature = "tls")]
                tls,
            } => listener
                .set_nonblocking(true)
                .and_then(|()| tokio::net::TcpListener::from_std(listener))
                .map(|listener| Incoming::Tcp {
                    listener,
                    #[cfg(feature = "tls")]
                    tls: tls.map(tokio_rustls::TlsAcceptor::from),
                }),
            #[cfg(unix)]
            ListenerKind::Unix(listener) => listener
                .set_nonblocking(true)
                .and_then(|()| tokio::net::UnixListener::from_std(listener))
                .map(Incoming::Unix),
            #[cfg(windows)]
            ListenerKind::Pipe(listener) => listener.into_async().map(Incoming::Pipe),
        };
        registered.map_err(|source| ListenerError::Register { endpoint, source })
    }
}

#[cfg(unix)]
impl AsFd for PluginListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.kind {
            ListenerKind::Tcp { listener, .. } => listener.as_fd(),
            ListenerKind::Unix(listener) => listener.as_fd(),
        }
    }
}

fn bind_tcp(address: &str) -> Result<TcpListener, ListenerError> {
    let mut addrs = address
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            address: address.to_owned(),
            source,
        })?;
    let addr = addrs
        .find(|addr| matches!(addr, SocketAddr::V4(_) | SocketAddr::V6(_)))
        .ok_or_else(|| ListenerError::ResolveEmpty {
            address: address.to_owned(),
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    if path.exists() {
        let metadata =
            fs::symlink_metadata(path).map_err(|source| ListenerError::UnixMetadata {
                path: path.display().to_string(),
                source,
            })?;
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::UnixNotSocket {
                path: path.display().to_string(),
            });
        }
        match UnixStream::connect(path) {
            Ok(_stream) => {
                return Err(ListenerError::UnixInUse {
                    path: path.display().to_string(),
                });
            }
            Err(error)
                if error.kind() == io::ErrorKind::ConnectionRefused
                    || error.kind() == io::ErrorKind::NotFound =>
            {
                fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                    path: path.display().to_string(),
                    source,
                })?;
                debug!(
                    target: LISTENER_TARGET,
                    path = %path.display(),
                    "removed stale socket file"
                );
            }
            Err(error) => {
                return Err(ListenerError::UnixConnect {
                    path: path.display().to_string(),
                    source: error,
                });
            }
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::transport::Connection;

    #[test]
    fn tcp_listener_reports_ephemeral_port() {
        let listener = PluginListener::bind_tcp("127.0.0.1:0").expect("bind tcp listener");
        let addr = listener.local_addr().expect("tcp listener has an address");
        assert_ne!(addr.port(), 0);
        assert_eq!(listener.endpoint(), format!("tcp://{addr}"));
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .expect("build runtime")
            .block_on(future)
    }

    #[test]
    fn tcp_listener_accepts_pending_connection() {
        let listener = PluginListener::bind_tcp("127.0.0.1:0").expect("bind tcp listener");
        let addr = listener.local_addr().expect("listener address");
        let _client = std::net::TcpStream::connect(addr).expect("connect client");

        let connection = block_on(async {
            let mut incoming = listener.into_incoming().expect("register listener");
            incoming.accept().await
        })
        .expect("accept connection");
        assert!(matches!(connection, Connection::Tcp(_)));
    }

    #[test]
    fn tcp_bind_fails_when_port_is_taken() {
        let reserved = TcpListener::bind("127.0.0.1:0").expect("reserve port");
        let addr = reserved.local_addr().expect("reserved address");
        let error =
            PluginListener::bind_tcp(&addr.to_string()).expect_err("second bind should fail");
        assert!(matches!(error, ListenerError::BindTcp { .. }));
    }

    #[test]
    fn tcp_bind_rejects_unresolvable_address() {
        let error = PluginListener::bind_tcp("not an address").expect_err("should not resolve");
        assert!(matches!(error, ListenerError::Resolve { .. }));
    }

    #[cfg(unix)]
    #[fixture]
    fn unix_tempdir() -> tempfile::TempDir {
        tempfile::tempdir().expect("temp dir")
    }

    #[cfg(unix)]
    #[rstest]
    fn unix_listener_replaces_stale_socket_files(unix_tempdir: tempfile::TempDir) {
        let path = unix_tempdir.path().join("plugin.sock");
        {
            let _stale = UnixListener::bind(&path).expect("bind stale listener");
        }
        assert!(path.exists(), "stale socket should remain");

        let listener = PluginListener::bind_unix(&path).expect("bind new listener");
        let _client = UnixStream::connect(&path).expect("connect unix client");
        let connection = block_on(async {
            let mut incoming = listener.into_incoming().expect("register listener");
            incoming.accept().await
        })
        .expect("accept connection");
        assert!(matches!(connection, Connection::Unix(_)));
    }

    #[cfg(unix)]
    #[rstest]
    fn unix_listener_rejects_in_use_socket(unix_tempdir: tempfile::TempDir) {
        let path = unix_tempdir.path().join("plugin.sock");
        let _existing = UnixListener::bind(&path).expect("bind existing listener");

        let error = PluginListener::bind_unix(&path).expect_err("should fail bind");
        assert!(matches!(error, ListenerError::UnixInUse { .. }));
    }

    #[cfg(unix)]
    #[rstest]
    fn unix_listener_rejects_regular_files(unix_tempdir: tempfile::TempDir) {
        let path = unix_tempdir.path().join("plugin.sock");
        fs::write(&path, b"not a socket").expect("write regular file");

        let error = PluginListener::bind_unix(&path).expect_err("should fail bind");
        assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
    }
}
