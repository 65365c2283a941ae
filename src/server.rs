//! Binds and serves the local HTTP/WebSocket API, with graceful shutdown.
//!
//! `listener`/`router`/`serve_with_graceful_shutdown`, with the router built
//! from this crate's [`AgentContext`] rather than assembled inline.

use crate::context::AgentContext;
use crate::rest_api::create_app;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Bind the configured address/port, returning the listener and the address
/// actually bound (useful when the configured port is 0).
///
/// # Errors
///
/// Returns an error if the address cannot be parsed or bound.
pub async fn bind(context: &AgentContext) -> std::io::Result<(TcpListener, SocketAddr)> {
    let addr = format!(
        "{}:{}",
        context.config.bind_address,
        context.config.api_port.into_inner()
    );
    let listener = TcpListener::bind(&addr).await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Serve the local API on `listener` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails to start or exits abnormally.
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    context: Arc<AgentContext>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = create_app(context);
    let shutdown_signal = async move {
        shutdown.cancelled().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(std::io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use tokio::time::{timeout, Duration};

    async fn test_context() -> Arc<AgentContext> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::default();
        config.bind_address = "127.0.0.1".to_string();
        config.api_port = crate::config::ApiPort::try_new(0).unwrap();
        config.database_path = dir.path().join("fogline.db");
        Arc::new(AgentContext::new(config).await.unwrap())
    }

    #[tokio::test]
    async fn bind_picks_an_available_port_when_configured_zero() {
        let context = test_context().await;
        let (listener, addr) = bind(&context).await.unwrap();
        assert_ne!(addr.port(), 0);
        drop(listener);
    }

    #[tokio::test]
    async fn server_answers_health_and_stops_on_cancellation() {
        let context = test_context().await;
        let (listener, addr) = bind(&context).await.unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        let handle = tokio::spawn(async move {
            serve_with_graceful_shutdown(listener, context, shutdown_clone).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(response.status().is_success());

        shutdown.cancel();
        let result = timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok());
    }
}
