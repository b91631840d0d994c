//! HTTP/1.1 serving of accepted plugin connections.
//!
//! Each connection is driven by hyper's HTTP/1 server. Request bodies are
//! collected in full, then the [`Router`] runs on the blocking pool so route
//! handlers may block freely. A handler panic answers `500` and leaves the
//! connection usable.

use std::convert::Infallible;
use std::sync::Arc;

use http::{HeaderValue, StatusCode, header};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::router::{Request, Response, Router};
use crate::transport::Connection;

const HTTP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::http");

/// Upper bound on buffered request heads.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on a collected request body.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Serves HTTP on `connection` until either side closes it.
pub(crate) async fn serve(connection: Connection, router: Arc<Router>) {
    match connection {
        Connection::Tcp(stream) => serve_io(stream, router).await,
        #[cfg(feature = "tls")]
        Connection::Tls { acceptor, stream } => match acceptor.accept(stream).await {
            Ok(stream) => serve_io(stream, router).await,
            Err(error) => debug!(target: HTTP_TARGET, error = %error, "TLS handshake failed"),
        },
        #[cfg(unix)]
        Connection::Unix(stream) => serve_io(stream, router).await,
        #[cfg(windows)]
        Connection::Pipe(pipe) => serve_io(pipe, router).await,
    }
}

async fn serve_io<S>(stream: S, router: Arc<Router>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(respond(router, request).await) }
    });
    if let Err(error) = http1::Builder::new()
        .max_buf_size(MAX_HEAD_BYTES)
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(target: HTTP_TARGET, error = %error, "connection closed with error");
    }
}

async fn respond(
    router: Arc<Router>,
    request: hyper::Request<Incoming>,
) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            let status = if error.downcast_ref::<LengthLimitError>().is_some() {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            debug!(
                target: HTTP_TARGET,
                error = %error,
                status = status.as_u16(),
                "rejected request body"
            );
            return into_hyper(status_response(status));
        }
    };

    let method = parts.method.clone();
    let path = parts.uri.path().to_owned();
    let request = Request::from_parts(parts, body.to_vec());
    let response = match tokio::task::spawn_blocking(move || router.dispatch(&request)).await {
        Ok(response) => response,
        Err(error) => {
            warn!(
                target: HTTP_TARGET,
                error = %error,
                path = %path,
                "route handler panicked"
            );
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    debug!(
        target: HTTP_TARGET,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "served request"
    );
    into_hyper(response)
}

fn into_hyper(response: Response) -> hyper::Response<Full<Bytes>> {
    response.map(|body| Full::new(Bytes::from(body)))
}

/// Plain-text response naming `status`.
fn status_response(status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or("error");
    let mut response = Response::new(format!("{} {reason}\n", status.as_str()).into_bytes());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_responses_name_the_status() {
        let response = status_response(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(response.body().starts_with(b"413 "));
    }
}
