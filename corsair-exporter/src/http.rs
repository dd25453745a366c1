//! HTTP server for the info and metrics endpoints.

use std::any::Any;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info};

use crate::error::{ExporterError, Result};
use crate::process_metrics::SharedProcessMetrics;
use crate::service::ExporterService;

/// Content type of the Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Upper bound of the random delay on the info endpoint.
const MAX_INFO_DELAY_MS: u64 = 200;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    service: ExporterService,
    process: SharedProcessMetrics,
}

impl AppState {
    pub fn new(service: ExporterService, process: SharedProcessMetrics) -> Self {
        Self { service, process }
    }
}

/// Create the HTTP router.
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/", get(info_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    with_error_handling(router)
}

/// Turn handler panics into empty 500 responses.
fn with_error_handling(router: Router) -> Router {
    router.layer(CatchPanicLayer::custom(handle_panic))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };

    error!(error = %detail, "Request handler failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Handler for the / endpoint.
async fn info_handler(State(state): State<AppState>) -> Response {
    let delay = Duration::from_millis(rand::rng().random_range(0..=MAX_INFO_DELAY_MS));
    tokio::time::sleep(delay).await;

    (StatusCode::OK, state.service.info()).into_response()
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let mut body = state.service.render();
    body.push_str(&state.process.render());

    (
        StatusCode::OK,
        [("content-type", METRICS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// HTTP server bound to its listen address.
pub struct HttpServer {
    router: Router,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HttpServer {
    /// Bind the listen address.
    pub async fn bind(state: AppState, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ExporterError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            router: create_router(state),
            listener,
            local_addr,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the shutdown signal is received.
    ///
    /// On shutdown the listener stops accepting and in-flight requests are
    /// allowed to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(addr = %self.local_addr, "HTTP server listening");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                info!("HTTP server shutting down");
            })
            .await
            .map_err(ExporterError::Server)?;

        info!("HTTP server stopped");
        Ok(())
    }
}
