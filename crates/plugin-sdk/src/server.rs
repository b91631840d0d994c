//! The plugin server: driver registration, activation and the accept loop.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use plugin_sdk_config::{PipeConfig, TransportConfig};
use thiserror::Error;
use tokio::runtime;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::activation::{ACTIVATE_PATH, ActivationHandler, ActivationResponse};
use crate::provision::{ListenerProvisioner, ProvisionedListener, SpecArtifact, SystemProvisioner};
use crate::registry::DriverRegistry;
use crate::router::{Request, Response, RouteHandler, Router};
use crate::service;
use crate::transport::{Incoming, ListenerError, PluginListener};

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Errors returned by the serve calls.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The listener could not be provisioned or registered with the runtime.
    #[error(transparent)]
    Provision(#[from] ListenerError),
    /// The async runtime driving the listener could not be started.
    #[error("failed to start plugin server runtime: {source}")]
    Runtime {
        /// Runtime construction error.
        #[source]
        source: io::Error,
    },
    /// Accepting connections failed with an unrecoverable error.
    #[error("failed to accept plugin connection: {source}")]
    Accept {
        /// Accept error.
        #[source]
        source: io::Error,
    },
}

/// Serves plugin drivers to a host over HTTP.
///
/// Drivers and raw handlers are registered first; a serve call then binds the
/// routes, installs the `/Plugin.Activate` handshake and blocks until the
/// server is shut down through its [`ShutdownHandle`] or accepting fails.
/// Connections are served on a Tokio runtime owned by the serve call, so serve
/// calls must not be made from inside another Tokio runtime.
///
/// ```no_run
/// use plugin_sdk::{PluginServer, Response};
///
/// let mut server = PluginServer::new();
/// server.register_driver("VolumeDriver", |router| {
///     router.handle_func("/VolumeDriver.Create", |_request| Response::new(b"{}".to_vec()));
/// });
/// server.serve_unix("my-volumes", None)?;
/// # Ok::<(), plugin_sdk::ServeError>(())
/// ```
#[derive(Debug, Default)]
pub struct PluginServer {
    router: Router,
    drivers: DriverRegistry,
    shutdown: ShutdownHandle,
}

impl PluginServer {
    /// Creates a server with no drivers or routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver. `initializer` runs once per serve call, before the
    /// listener accepts connections, and binds the driver's routes.
    ///
    /// Registering the same name again replaces the earlier initializer.
    pub fn register_driver<F>(&mut self, name: impl Into<String>, initializer: F)
    where
        F: Fn(&mut Router) + Send + Sync + 'static,
    {
        self.drivers.register(name, initializer);
    }

    /// Binds a handler to `path` outside any driver.
    ///
    /// A handler bound to `/Plugin.Activate` is replaced by the activation
    /// handshake when serving starts.
    pub fn handle(&mut self, path: impl Into<String>, handler: impl RouteHandler) {
        self.router.handle(path, handler);
    }

    /// Binds a closure to `path` outside any driver.
    pub fn handle_func<F>(&mut self, path: impl Into<String>, handler: F)
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.router.handle_func(path, handler);
    }

    /// Handle that stops a running serve call from another thread.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Provisions `transport` with `provisioner` and serves on it.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Provision`] when provisioning fails and
    /// [`ServeError::Accept`] when accepting connections fails.
    pub fn serve_with<P>(
        &mut self,
        provisioner: &P,
        transport: &TransportConfig,
    ) -> Result<(), ServeError>
    where
        P: ListenerProvisioner + ?Sized,
    {
        let provisioned = provisioner.provision(transport)?;
        self.serve(provisioned)
    }

    /// Serves on `transport` using the [`SystemProvisioner`] conventions.
    ///
    /// # Errors
    ///
    /// See [`PluginServer::serve_with`].
    pub fn serve_config(&mut self, transport: &TransportConfig) -> Result<(), ServeError> {
        self.serve_with(&SystemProvisioner::new(), transport)
    }

    /// Serves over TCP and publishes `<plugin_name>.spec`.
    ///
    /// `daemon_dir` is the host daemon's data root; it locates the spec
    /// directory on Windows and is ignored elsewhere.
    ///
    /// # Errors
    ///
    /// See [`PluginServer::serve_with`].
    pub fn serve_tcp(
        &mut self,
        address: &str,
        plugin_name: &str,
        daemon_dir: Option<&Utf8Path>,
    ) -> Result<(), ServeError> {
        self.serve_config(&tcp_transport(address, plugin_name, daemon_dir))
    }

    /// Serves over TLS on TCP and publishes `<plugin_name>.spec`.
    ///
    /// # Errors
    ///
    /// See [`PluginServer::serve_with`].
    #[cfg(feature = "tls")]
    pub fn serve_tls(
        &mut self,
        address: &str,
        plugin_name: &str,
        daemon_dir: Option<&Utf8Path>,
        config: Arc<rustls::ServerConfig>,
    ) -> Result<(), ServeError> {
        let provisioner = SystemProvisioner::new().with_tls(config);
        self.serve_with(&provisioner, &tcp_transport(address, plugin_name, daemon_dir))
    }

    /// Serves over a Unix socket. `address` is an absolute socket path or a
    /// plugin name resolved under the plugin socket directory.
    ///
    /// # Errors
    ///
    /// See [`PluginServer::serve_with`].
    pub fn serve_unix(&mut self, address: &str, gid: Option<u32>) -> Result<(), ServeError> {
        let mut transport = TransportConfig::unix(address);
        if let Some(group) = gid {
            transport = transport.with_gid(group);
        }
        self.serve_config(&transport)
    }

    /// Serves over a Windows named pipe and publishes `<plugin_name>.spec`.
    ///
    /// # Errors
    ///
    /// See [`PluginServer::serve_with`]. Fails with
    /// a `ListenerError::UnsupportedPipe` on other platforms.
    pub fn serve_windows(
        &mut self,
        address: &str,
        plugin_name: &str,
        daemon_dir: Option<&Utf8Path>,
        pipe: &PipeConfig,
    ) -> Result<(), ServeError> {
        let mut transport =
            TransportConfig::named_pipe(address, plugin_name).with_pipe_config(pipe.clone());
        if let Some(dir) = daemon_dir {
            transport = transport.with_daemon_dir(dir);
        }
        self.serve_config(&transport)
    }

    /// Serves on an already provisioned listener.
    ///
    /// The spec artifact recorded in `provisioned` is removed when this call
    /// returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Runtime`] when the runtime cannot start,
    /// [`ServeError::Provision`] when the listener cannot be registered with
    /// it and [`ServeError::Accept`] when accepting connections fails.
    pub fn serve(&mut self, provisioned: ProvisionedListener) -> Result<(), ServeError> {
        let ProvisionedListener {
            listener,
            spec_path,
        } = provisioned;
        let artifact = spec_path.map(SpecArtifact::new);

        let mut router = self.router.clone();
        let drivers = self.drivers.initialize(&mut router);
        let activation = ActivationResponse::new(drivers);
        router.handle(ACTIVATE_PATH, ActivationHandler::new(&activation));

        let result = self.run(listener, router, &activation, artifact.as_ref());
        self.shutdown.reset();
        drop(artifact);
        result
    }

    /// Drives the accept loop on a fresh runtime. The listener is closed
    /// before this returns.
    fn run(
        &self,
        listener: PluginListener,
        router: Router,
        activation: &ActivationResponse,
        artifact: Option<&SpecArtifact>,
    ) -> Result<(), ServeError> {
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("plugin-server")
            .build()
            .map_err(|source| ServeError::Runtime { source })?;

        let endpoint = listener.endpoint().to_owned();
        let result = runtime.block_on(async {
            let mut incoming = listener.into_incoming()?;
            info!(
                target: SERVER_TARGET,
                endpoint = %endpoint,
                drivers = ?activation.implements,
                spec = ?artifact.map(SpecArtifact::path),
                "plugin server listening"
            );
            accept_loop(&mut incoming, &self.shutdown, &Arc::new(router)).await
        });
        // In-flight connections are abandoned with the runtime.
        runtime.shutdown_background();
        if result.is_ok() {
            info!(target: SERVER_TARGET, endpoint = %endpoint, "plugin server stopped");
        }
        result
    }
}

fn tcp_transport(
    address: &str,
    plugin_name: &str,
    daemon_dir: Option<&Utf8Path>,
) -> TransportConfig {
    let transport = TransportConfig::tcp(address, plugin_name);
    match daemon_dir {
        Some(dir) => transport.with_daemon_dir(dir),
        None => transport,
    }
}

async fn accept_loop(
    incoming: &mut Incoming,
    shutdown: &ShutdownHandle,
    router: &Arc<Router>,
) -> Result<(), ServeError> {
    let mut stop = shutdown.subscribe();
    let mut last_error = None::<io::ErrorKind>;
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.wait_for(|requested| *requested) => return Ok(()),
            accepted = incoming.accept() => accepted,
        };
        match accepted {
            Ok(connection) => {
                last_error = None;
                tokio::spawn(service::serve(connection, Arc::clone(router)));
            }
            Err(error) if is_transient(&error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: SERVER_TARGET,
                        error = %error,
                        "transient accept error; retrying"
                    );
                }
                last_error = Some(kind);
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
            Err(error) => {
                warn!(target: SERVER_TARGET, error = %error, "accept failed; stopping");
                return Err(ServeError::Accept { source: error });
            }
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
    ) || is_resource_exhaustion(error)
}

#[cfg(unix)]
fn is_resource_exhaustion(error: &io::Error) -> bool {
    use nix::libc;

    matches!(
        error.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
const fn is_resource_exhaustion(_error: &io::Error) -> bool {
    false
}

/// Stops a running serve call.
///
/// Clones share state with the server they came from. A shutdown requested
/// before serving starts makes the next serve call return immediately; the
/// request is cleared once that call returns.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        let (requested, _) = watch::channel(false);
        Self {
            requested: Arc::new(requested),
        }
    }
}

impl ShutdownHandle {
    /// Requests shutdown. The serve call closes its listener, removes its
    /// spec artifact and returns `Ok(())`.
    pub fn shutdown(&self) {
        self.requested.send_replace(true);
        debug!(target: SERVER_TARGET, "shutdown requested");
    }

    /// Reports whether shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        *self.requested.borrow()
    }

    fn reset(&self) {
        self.requested.send_replace(false);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.requested.subscribe()
    }
}
