//! Server Implementation
//!
//! HTTP 服务器启动和管理

use tokio::net::TcpListener;

use crate::api;
use crate::core::{Config, Result, ServerError, ServerState};

/// HTTP Server
pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Create server with existing state
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    /// Serve until ctrl-c
    pub async fn run(&self) -> Result<()> {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down...");
        };
        self.run_until(shutdown).await
    }

    /// Serve until `signal` resolves, then stop background tasks
    pub async fn run_until(&self, signal: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let state = match &self.state {
            Some(s) => s.clone(),
            None => ServerState::initialize(&self.config).await?,
        };

        let tasks = state.start_background_tasks();
        let app = api::build_app(state.clone());

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            port: self.config.http_port,
            source,
        })?;
        tracing::info!("Stream server listening on {}", addr);

        // SSE sessions watch the same token, so open streams end with the signal
        let token = state.shutdown_token();
        let graceful = async move {
            signal.await;
            token.cancel();
        };

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await
            .map_err(|e| ServerError::Internal(e.into()));

        tasks.shutdown(self.config.shutdown_timeout()).await;
        served
    }
}
