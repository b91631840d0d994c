//! Async accept side of a registered plugin listener.

use std::io;

use tokio::net::TcpStream;

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
#[cfg(windows)]
use tokio::net::windows::named_pipe::NamedPipeServer;

#[cfg(windows)]
use super::pipe::AsyncPipeListener;

/// Listener registered with the runtime, yielding one [`Connection`] per
/// accepted peer.
pub(crate) enum Incoming {
    Tcp {
        listener: tokio::net::TcpListener,
        #[cfg(feature = "tls")]
        tls: Option<tokio_rustls::TlsAcceptor>,
    },
    #[cfg(unix)]
    Unix(UnixListener),
    #[cfg(windows)]
    Pipe(AsyncPipeListener),
}

/// An accepted connection. TLS handshakes run on the connection task rather
/// than in the accept loop.
pub(crate) enum Connection {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls {
        acceptor: tokio_rustls::TlsAcceptor,
        stream: TcpStream,
    },
    #[cfg(unix)]
    Unix(UnixStream),
    #[cfg(windows)]
    Pipe(NamedPipeServer),
}

impl Incoming {
    /// Waits for the next connection.
    pub(crate) async fn accept(&mut self) -> io::Result<Connection> {
        match self {
            Self::Tcp { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(self.wrap_tcp(stream))
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Connection::Unix(stream))
            }
            #[cfg(windows)]
            Self::Pipe(listener) => listener.accept().await.map(Connection::Pipe),
        }
    }

    fn wrap_tcp(&self, stream: TcpStream) -> Connection {
        #[cfg(feature = "tls")]
        if let Self::Tcp {
            tls: Some(acceptor),
            ..
        } = self
        {
            return Connection::Tls {
                acceptor: acceptor.clone(),
                stream,
            };
        }
        Connection::Tcp(stream)
    }
}
