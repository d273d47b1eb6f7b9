//! HTTP adapter
//!
//! Binds the listener and wraps the router with the settings every
//! application gets: body ceiling, request ids, path normalization and TCP
//! keep-alive.

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{HeaderName, HeaderValue};
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::Layer;
use tower::util::{MapRequest, MapRequestLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

/// 10 MiB
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(65);
pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

const LISTEN_BACKLOG: i32 = 1024;

/// Network adapter settings
#[derive(Debug, Clone)]
pub struct ServerAdapter {
    body_limit: usize,
    ignore_duplicate_slashes: bool,
    ignore_trailing_slash: bool,
    keep_alive: Duration,
}

impl Default for ServerAdapter {
    fn default() -> Self {
        Self {
            body_limit: DEFAULT_BODY_LIMIT,
            ignore_duplicate_slashes: true,
            ignore_trailing_slash: true,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

impl ServerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body_limit(&self) -> usize {
        self.body_limit
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn ignores_duplicate_slashes(&self) -> bool {
        self.ignore_duplicate_slashes
    }

    pub fn ignores_trailing_slash(&self) -> bool {
        self.ignore_trailing_slash
    }

    /// Add the body ceiling and request id layers.
    ///
    /// The request id is read from `x-trace-id`, then `x-correlation-id`, and
    /// generated otherwise. It is echoed back as `x-trace-id`.
    pub fn apply(&self, router: Router) -> Router {
        let header = HeaderName::from_static(TRACE_ID_HEADER);
        router
            .layer(DefaultBodyLimit::max(self.body_limit))
            .layer(RequestBodyLimitLayer::new(self.body_limit))
            .layer(PropagateRequestIdLayer::new(header.clone()))
            .layer(SetRequestIdLayer::new(header, MakeTraceId))
    }

    /// Wrap the whole router so paths are normalized before routing.
    pub fn normalized(
        &self,
        router: Router,
    ) -> MapRequest<Router, impl Fn(Request) -> Request + Clone + Send + Sync + 'static> {
        let duplicate = self.ignore_duplicate_slashes;
        let trailing = self.ignore_trailing_slash;
        MapRequestLayer::new(move |request| normalize_request(request, duplicate, trailing))
            .layer(router)
    }

    /// Bind a TCP listener on `addr`.
    pub fn bind(&self, addr: SocketAddr) -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(self.keep_alive))?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        TcpListener::from_std(socket.into())
    }

    /// Serve `router` on `listener` until `shutdown` resolves.
    ///
    /// In-flight requests are drained before the returned task finishes.
    pub fn serve<F>(
        &self,
        listener: TcpListener,
        router: Router,
        shutdown: F,
    ) -> JoinHandle<io::Result<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let service = self.normalized(self.apply(router));

        tokio::spawn(async move {
            axum::serve(
                listener,
                axum::ServiceExt::<Request>::into_make_service(service),
            )
            .with_graceful_shutdown(shutdown)
            .await
        })
    }
}

/// Trace ids for [`SetRequestIdLayer`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeTraceId;

impl MakeRequestId for MakeTraceId {
    fn make_request_id<B>(&mut self, request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = match request.headers().get(CORRELATION_ID_HEADER) {
            Some(correlation) => correlation.clone(),
            None => HeaderValue::from_str(&Uuid::now_v7().to_string()).ok()?,
        };
        Some(RequestId::new(id))
    }
}

fn normalize_request(mut request: Request, duplicate: bool, trailing: bool) -> Request {
    let path = request.uri().path();
    let normalized = normalize_path(path, duplicate, trailing);
    if normalized == path {
        return request;
    }

    let path_and_query = match request.uri().query() {
        Some(query) => format!("{normalized}?{query}"),
        None => normalized,
    };

    let mut parts = request.uri().clone().into_parts();
    match path_and_query.parse() {
        Ok(pq) => parts.path_and_query = Some(pq),
        Err(_) => return request,
    }
    if let Ok(uri) = axum::http::Uri::from_parts(parts) {
        *request.uri_mut() = uri;
    }
    request
}

/// Collapse repeated slashes and drop a trailing one. The root stays `/`.
pub fn normalize_path(path: &str, duplicate: bool, trailing: bool) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if duplicate && c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }

    if trailing {
        while out.len() > 1 && out.ends_with('/') {
            out.pop();
        }
    }

    if out.is_empty() {
        out.push('/');
    }
    out
}
