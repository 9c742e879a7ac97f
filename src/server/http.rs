//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Each connection is
//! served on its own task; each request runs under the configured timeout.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::routes;
use crate::routes::api::BoxError;
use crate::services::ServiceContext;

/// Which store implementation is serving requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mongo => "mongodb",
            Self::Memory => "memory",
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Mongo)
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ctx: ServiceContext,
    pub backend: StoreBackend,
    /// Requests running longer are abandoned with 504
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(ctx: ServiceContext, backend: StoreBackend, request_timeout: Duration) -> Self {
        Self {
            ctx,
            backend,
            request_timeout,
        }
    }

    /// In-memory stores with default policy, for development and tests
    pub fn in_memory() -> Self {
        Self::new(
            ServiceContext::in_memory(),
            StoreBackend::Memory,
            Duration::from_secs(30),
        )
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}

/// Serve until `shutdown` resolves, then let in-flight connections finish
pub async fn run<F>(listen: SocketAddr, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(listen).await?;
    info!(
        "ChoosePure listening on {} ({} store)",
        listener.local_addr()?,
        state.backend.as_str()
    );
    if !state.backend.is_persistent() {
        warn!("Using in-memory store - data is lost on restart");
    }

    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    connections.spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { Ok::<_, Infallible>(handle_request(&state, addr, req).await) }
                        });

                        if let Err(err) = http1::Builder::new()
                            .title_case_headers(true)
                            .serve_connection(io, service)
                            .await
                        {
                            debug!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            _ = &mut shutdown => break,
            // Reap finished connections so the set does not grow unbounded
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!("Draining {} open connections", connections.len());
    while connections.join_next().await.is_some() {}
    info!("Server stopped");
    Ok(())
}

/// Route one request, bounded by the request timeout
pub async fn handle_request<B>(state: &AppState, addr: SocketAddr, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = match tokio::time::timeout(state.request_timeout, route(state, req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("[{}] {} {} timed out after {:?}", addr, method, path, state.request_timeout);
            routes::timeout_response()
        }
    };

    info!(
        "[{}] {} {} -> {} ({} ms)",
        addr,
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

async fn route<B>(state: &AppState, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        // CORS preflight
        (&Method::OPTIONS, _) => routes::preflight_response(),

        (&Method::GET, "/") | (&Method::GET, "/api/v2") | (&Method::GET, "/api/v2/") => {
            routes::root_info()
        }

        (&Method::GET, "/health") | (&Method::GET, "/api/v2/health") => {
            routes::health_check(state).await
        }

        (_, path) if path.starts_with(routes::api::API_PREFIX) => {
            routes::handle_api_request(state, req).await
        }

        (_, path) => routes::not_found_response(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    fn addr() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    fn get(uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_preflight() {
        let state = AppState::in_memory();
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v2/voting/cast-vote")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = handle_request(&state, addr(), req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("Access-Control-Allow-Origin").unwrap(), "*");
    }

    #[tokio::test]
    async fn test_health_in_memory() {
        let state = AppState::in_memory();
        let resp = handle_request(&state, addr(), get("/health")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let state = AppState::in_memory();
        let resp = handle_request(&state, addr(), get("/nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = handle_request(&state, addr(), get("/api/v2/nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        use http_body_util::StreamBody;
        use hyper::body::Frame;

        let mut state = AppState::in_memory();
        state.request_timeout = Duration::from_millis(50);

        let stalled = futures_util::stream::pending::<Result<Frame<Bytes>, Infallible>>();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/v2/voting/quick-signup")
            .body(StreamBody::new(stalled))
            .unwrap();

        let resp = handle_request(&state, addr(), req).await;
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
