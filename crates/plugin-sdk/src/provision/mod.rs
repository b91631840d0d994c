//! Turning a [`TransportConfig`] into a bound listener plus discovery data.
//!
//! A host finds a plugin either through a socket in the conventional plugin
//! socket directory or through a `<name>.spec` file naming the endpoint URL.
//! [`SystemProvisioner`] implements those conventions; embedders with other
//! discovery schemes implement [`ListenerProvisioner`] themselves.

mod spec_file;

use std::path::PathBuf;

#[cfg(feature = "tls")]
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use plugin_sdk_config::{PipeConfig, TransportConfig};
use tracing::info;

use crate::transport::{ListenerError, PluginListener};

use self::spec_file::{atomic_write, create_dir};
pub(crate) use self::spec_file::SpecArtifact;

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
#[cfg(unix)]
use std::path::Path;

#[cfg(unix)]
use plugin_sdk_config::UNIX_SOCKET_DIR;
#[cfg(not(windows))]
use plugin_sdk_config::UNIX_SPEC_DIR;
#[cfg(windows)]
use plugin_sdk_config::windows_default_daemon_root_dir;

pub(crate) const PROVISION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::provision");

/// A bound listener and the discovery artifact written for it.
#[derive(Debug)]
pub struct ProvisionedListener {
    /// Listener the server accepts host connections on.
    pub listener: PluginListener,
    /// Spec file or socket path the server removes when it stops.
    pub spec_path: Option<PathBuf>,
}

impl ProvisionedListener {
    /// Wraps a listener without a discovery artifact.
    #[must_use]
    pub const fn new(listener: PluginListener) -> Self {
        Self {
            listener,
            spec_path: None,
        }
    }

    /// Records the discovery artifact the server owns for cleanup.
    #[must_use]
    pub fn with_spec_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.spec_path = Some(path.into());
        self
    }
}

/// Produces listeners for transport configurations.
pub trait ListenerProvisioner {
    /// Binds the endpoint described by `transport` and publishes whatever the
    /// host needs to discover it.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint cannot be bound or the discovery
    /// artifact cannot be written. No artifact is left behind on failure.
    fn provision(&self, transport: &TransportConfig)
    -> Result<ProvisionedListener, ListenerError>;
}

/// Provisioner following the host's filesystem conventions.
///
/// - TCP listeners publish `<spec dir>/<plugin>.spec` containing the bound
///   `tcp://` URL. The spec directory is `/etc/docker/plugins` on Unix and
///   `<daemon root>/plugins` on Windows.
/// - Unix sockets live at the configured absolute path or at
///   `/run/docker/plugins/<name>.sock`, are restricted to mode `0660` and may
///   be handed to a group. The socket itself is the discovery artifact.
/// - Named pipes publish a spec file containing the `npipe://` URL.
#[derive(Debug, Clone, Default)]
pub struct SystemProvisioner {
    spec_dir: Option<Utf8PathBuf>,
    socket_dir: Option<Utf8PathBuf>,
    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl SystemProvisioner {
    /// Creates a provisioner using the platform directories.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes spec files to `dir` instead of the platform spec directory.
    #[must_use]
    pub fn with_spec_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.spec_dir = Some(dir.into());
        self
    }

    /// Resolves Unix socket names under `dir` instead of the platform socket
    /// directory.
    #[must_use]
    pub fn with_socket_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    /// Serves TCP listeners over TLS.
    #[cfg(feature = "tls")]
    #[must_use]
    pub fn with_tls(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    fn provision_tcp(
        &self,
        address: &str,
        plugin_name: &str,
        daemon_dir: Option<&Utf8Path>,
    ) -> Result<ProvisionedListener, ListenerError> {
        #[cfg_attr(not(feature = "tls"), expect(unused_mut, reason = "only TLS rebinds"))]
        let mut listener = PluginListener::bind_tcp(address)?;
        #[cfg(feature = "tls")]
        if let Some(config) = &self.tls {
            listener = listener.with_tls(Arc::clone(config));
        }

        let dir = self.spec_dir(daemon_dir)?;
        let spec_path = write_spec(&dir, plugin_name, listener.endpoint())?;
        Ok(ProvisionedListener::new(listener).with_spec_path(spec_path))
    }

    #[cfg(unix)]
    fn provision_unix(
        &self,
        address: &str,
        gid: Option<u32>,
    ) -> Result<ProvisionedListener, ListenerError> {
        let path = self.socket_path(address);
        if let Some(parent) = path.parent() {
            create_dir(parent).map_err(|source| ListenerError::SocketDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let listener = PluginListener::bind_unix(&path)?;
        if let Err(error) = restrict_socket(&path, gid) {
            drop(listener);
            drop(SpecArtifact::new(path));
            return Err(error);
        }
        info!(
            target: PROVISION_TARGET,
            socket = %path.display(),
            gid,
            "provisioned plugin socket"
        );
        Ok(ProvisionedListener::new(listener).with_spec_path(path))
    }

    #[cfg(not(unix))]
    #[expect(clippy::unused_self, reason = "mirrors the Unix signature")]
    fn provision_unix(
        &self,
        address: &str,
        _gid: Option<u32>,
    ) -> Result<ProvisionedListener, ListenerError> {
        Err(ListenerError::UnsupportedUnix {
            address: address.to_owned(),
        })
    }

    #[cfg(windows)]
    fn provision_pipe(
        &self,
        address: &str,
        plugin_name: &str,
        daemon_dir: Option<&Utf8Path>,
        pipe: &PipeConfig,
    ) -> Result<ProvisionedListener, ListenerError> {
        let listener = PluginListener::bind_pipe(address, pipe)?;
        let dir = self.spec_dir(daemon_dir)?;
        let spec_path = write_spec(&dir, plugin_name, listener.endpoint())?;
        Ok(ProvisionedListener::new(listener).with_spec_path(spec_path))
    }

    #[cfg(not(windows))]
    #[expect(clippy::unused_self, reason = "mirrors the Windows signature")]
    fn provision_pipe(
        &self,
        address: &str,
        _plugin_name: &str,
        _daemon_dir: Option<&Utf8Path>,
        _pipe: &PipeConfig,
    ) -> Result<ProvisionedListener, ListenerError> {
        Err(ListenerError::UnsupportedPipe {
            address: address.to_owned(),
        })
    }

    fn spec_dir(&self, daemon_dir: Option<&Utf8Path>) -> Result<Utf8PathBuf, ListenerError> {
        match &self.spec_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_spec_dir(daemon_dir),
        }
    }

    #[cfg(unix)]
    fn socket_path(&self, address: &str) -> PathBuf {
        let candidate = Path::new(address);
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        let dir = self
            .socket_dir
            .as_deref()
            .unwrap_or_else(|| Utf8Path::new(UNIX_SOCKET_DIR));
        dir.join(format!("{address}.sock")).into_std_path_buf()
    }
}

impl ListenerProvisioner for SystemProvisioner {
    fn provision(
        &self,
        transport: &TransportConfig,
    ) -> Result<ProvisionedListener, ListenerError> {
        match transport {
            TransportConfig::Tcp {
                address,
                plugin_name,
                daemon_dir,
            } => self.provision_tcp(address, plugin_name, daemon_dir.as_deref()),
            TransportConfig::Unix { address, gid } => self.provision_unix(address, *gid),
            TransportConfig::NamedPipe {
                address,
                plugin_name,
                daemon_dir,
                pipe,
            } => self.provision_pipe(address, plugin_name, daemon_dir.as_deref(), pipe),
        }
    }
}

#[cfg(not(windows))]
#[expect(
    clippy::unnecessary_wraps,
    reason = "Windows resolution of the daemon root can fail"
)]
fn default_spec_dir(_daemon_dir: Option<&Utf8Path>) -> Result<Utf8PathBuf, ListenerError> {
    Ok(Utf8PathBuf::from(UNIX_SPEC_DIR))
}

#[cfg(windows)]
fn default_spec_dir(daemon_dir: Option<&Utf8Path>) -> Result<Utf8PathBuf, ListenerError> {
    let root = daemon_dir
        .map(Utf8Path::to_path_buf)
        .or_else(windows_default_daemon_root_dir)
        .ok_or_else(|| ListenerError::DaemonRootMissing {
            path: PathBuf::from("%ProgramData%\\docker"),
        })?;
    if !root.is_dir() {
        return Err(ListenerError::DaemonRootMissing {
            path: root.into_std_path_buf(),
        });
    }
    Ok(root.join("plugins"))
}

fn write_spec(dir: &Utf8Path, plugin_name: &str, url: &str) -> Result<PathBuf, ListenerError> {
    create_dir(dir.as_std_path()).map_err(|source| ListenerError::SpecDirectory {
        path: dir.as_std_path().to_path_buf(),
        source,
    })?;
    let path = dir.join(format!("{plugin_name}.spec")).into_std_path_buf();
    atomic_write(&path, url.as_bytes()).map_err(|source| ListenerError::SpecWrite {
        path: path.clone(),
        source,
    })?;
    info!(
        target: PROVISION_TARGET,
        spec = %path.display(),
        endpoint = url,
        "published plugin spec"
    );
    Ok(path)
}

#[cfg(unix)]
fn restrict_socket(path: &Path, gid: Option<u32>) -> Result<(), ListenerError> {
    if let Some(group) = gid {
        nix::unistd::chown(path, None, Some(nix::unistd::Gid::from_raw(group))).map_err(
            |source| ListenerError::UnixOwnership {
                path: path.display().to_string(),
                gid: group,
                source,
            },
        )?;
    }
    fs::set_permissions(path, fs::Permissions::from_mode(0o660)).map_err(|source| {
        ListenerError::UnixPermissions {
            path: path.display().to_string(),
            source,
        }
    })
}
