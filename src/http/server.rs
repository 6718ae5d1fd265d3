//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::router;
use crate::error::Result;
use crate::ratelimit::AdmissionEngine;

/// HTTP server for the admission decision service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission engine instance
    engine: Arc<AdmissionEngine>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, engine: Arc<AdmissionEngine>) -> Self {
        Self { addr, engine }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(
            addr = %self.addr,
            "Starting HTTP server for admission service with graceful shutdown"
        );

        axum::serve(listener, router(self.engine))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e.into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdmissionConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn test_server_stops_on_signal() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let engine = Arc::new(AdmissionEngine::from_config(&AdmissionConfig::default()).unwrap());
        let server = HttpServer::new(addr, engine);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            server.serve_with_shutdown(async {}),
        )
        .await
        .expect("server did not shut down");
        tokio_test::assert_ok!(result);
    }
}
