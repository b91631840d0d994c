//! Exact-path request routing.
//!
//! The router maps request paths to handlers. Bound paths are compared with
//! the percent-decoded request URI path, so `/Plugin%2EActivate` reaches the
//! handler bound to `/Plugin.Activate`. There is no prefix matching, no
//! method filtering and no pattern syntax. Unmatched paths answer `404`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::{HeaderValue, StatusCode, header};
use percent_encoding::percent_decode_str;
use tracing::debug;

/// HTTP request as seen by route handlers.
pub type Request = http::Request<Vec<u8>>;

/// HTTP response produced by route handlers.
pub type Response = http::Response<Vec<u8>>;

/// Tracing target for routing decisions.
pub(crate) const ROUTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::router");

const NOT_FOUND_BODY: &str = "404 page not found\n";

/// Handles requests for a single path.
///
/// Handlers run on a blocking worker thread and may be invoked concurrently for
/// different connections.
pub trait RouteHandler: Send + Sync + 'static {
    /// Produces the response for `request`.
    fn handle(&self, request: &Request) -> Response;
}

impl<F> RouteHandler for F
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

/// Path-keyed dispatch table.
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<String, Arc<dyn RouteHandler>>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `path`, replacing any handler already bound there.
    pub fn handle(&mut self, path: impl Into<String>, handler: impl RouteHandler) {
        let route = path.into();
        if self
            .routes
            .insert(route.clone(), Arc::new(handler))
            .is_some()
        {
            debug!(target: ROUTER_TARGET, path = %route, "replaced existing route handler");
        }
    }

    /// Binds a closure to `path`.
    pub fn handle_func<F>(&mut self, path: impl Into<String>, handler: F)
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.handle(path, handler);
    }

    /// Reports whether a handler is bound to `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Number of bound paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Reports whether no paths are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches `request` to the handler bound to its decoded path.
    #[must_use]
    pub fn dispatch(&self, request: &Request) -> Response {
        let path = percent_decode_str(request.uri().path()).decode_utf8_lossy();
        match self.routes.get(path.as_ref()) {
            Some(handler) => handler.handle(request),
            None => {
                debug!(
                    target: ROUTER_TARGET,
                    method = %request.method(),
                    path = %path,
                    "no handler bound to path"
                );
                not_found()
            }
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        formatter
            .debug_struct("Router")
            .field("paths", &paths)
            .finish()
    }
}

fn not_found() -> Response {
    let mut response = Response::new(NOT_FOUND_BODY.as_bytes().to_vec());
    *response.status_mut() = StatusCode::NOT_FOUND;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    fn request(path: &str) -> Request {
        http::Request::builder()
            .uri(path)
            .body(Vec::new())
            .expect("build request")
    }

    fn text(body: &'static str) -> impl Fn(&Request) -> Response + Send + Sync + 'static {
        move |_| Response::new(body.as_bytes().to_vec())
    }

    #[fixture]
    fn router() -> Router {
        let mut router = Router::new();
        router.handle_func("/VolumeDriver.Create", text("create"));
        router.handle_func("/VolumeDriver.Remove", text("remove"));
        router
    }

    #[rstest]
    #[case("/VolumeDriver.Create", "create")]
    #[case("/VolumeDriver.Remove", "remove")]
    fn dispatches_exact_paths(router: Router, #[case] path: &str, #[case] expected: &str) {
        let response = router.dispatch(&request(path));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_slice(), expected.as_bytes());
    }

    #[rstest]
    #[case("/VolumeDriver.Mount")]
    #[case("/VolumeDriver.Create/extra")]
    #[case("/volumedriver.create")]
    #[case("/")]
    fn unmatched_paths_answer_not_found(router: Router, #[case] path: &str) {
        let response = router.dispatch(&request(path));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_slice(), NOT_FOUND_BODY.as_bytes());
    }

    #[rstest]
    #[case("/VolumeDriver%2ECreate", "create")]
    #[case("/Volume%44river.Remove", "remove")]
    fn percent_encoded_paths_match_their_decoded_route(
        router: Router,
        #[case] path: &str,
        #[case] expected: &str,
    ) {
        let response = router.dispatch(&request(path));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_slice(), expected.as_bytes());
    }

    #[rstest]
    fn undecodable_paths_answer_not_found(router: Router) {
        let response = router.dispatch(&request("/VolumeDriver.Create%FF"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[rstest]
    fn query_strings_do_not_affect_matching(router: Router) {
        let response = router.dispatch(&request("/VolumeDriver.Create?force=1"));
        assert_eq!(response.body().as_slice(), b"create");
    }

    #[rstest]
    fn rebinding_a_path_replaces_the_handler(mut router: Router) {
        router.handle_func("/VolumeDriver.Create", text("replaced"));

        assert_eq!(router.len(), 2);
        let response = router.dispatch(&request("/VolumeDriver.Create"));
        assert_eq!(response.body().as_slice(), b"replaced");
    }

    #[test]
    fn empty_router_reports_no_routes() {
        let router = Router::new();
        assert!(router.is_empty());
        assert!(!router.contains("/Plugin.Activate"));
    }

    #[derive(Debug)]
    struct Status(StatusCode);

    impl RouteHandler for Status {
        fn handle(&self, _request: &Request) -> Response {
            let mut response = Response::new(Vec::new());
            *response.status_mut() = self.0;
            response
        }
    }

    #[test]
    fn accepts_trait_object_handlers() {
        let mut router = Router::new();
        router.handle("/NetworkDriver.Leave", Status(StatusCode::ACCEPTED));

        let response = router.dispatch(&request("/NetworkDriver.Leave"));
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
