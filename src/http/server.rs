//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::StatusCode, routing::get, Router};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::enforce_admission;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::AdmissionControl;

/// Build the application router with admission enforced on every route.
pub fn router(admission: Arc<dyn AdmissionControl>) -> Router {
    Router::new()
        .route("/", get(home))
        .layer(axum::middleware::from_fn_with_state(
            admission,
            enforce_admission,
        ))
}

async fn home() -> (StatusCode, &'static str) {
    (StatusCode::OK, "Welcome home!")
}

/// HTTP server fronting the downstream handler with admission control.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission decision maker
    admission: Arc<dyn AdmissionControl>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, admission: Arc<dyn AdmissionControl>) -> Self {
        Self { addr, admission }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            router(self.admission).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Io(e)
        })
    }
}
