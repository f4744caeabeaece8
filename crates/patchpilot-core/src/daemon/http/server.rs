use crate::AgentService;
use crate::config::ServerSection;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::router;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port to listen on (default: 8000)
    pub port: u16,
    /// CORS allowed origins; `*` allows any
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::from(&ServerSection::default())
    }
}

impl From<&ServerSection> for HttpConfig {
    fn from(section: &ServerSection) -> Self {
        Self {
            host: section.host.clone(),
            port: section.port,
            cors_origins: section.cors_origins.clone(),
        }
    }
}

/// HTTP and WebSocket gateway in front of an [`AgentService`]
pub struct HttpServer {
    config: HttpConfig,
    service: Arc<AgentService>,
}

impl HttpServer {
    pub fn new(config: HttpConfig, service: Arc<AgentService>) -> Self {
        Self { config, service }
    }

    /// Build the router with all gateway routes
    fn build_router(&self) -> Router {
        router::build_router(self.service.clone(), &self.config)
    }

    /// Serve until `shutdown` fires, then finish in-flight requests.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let app = self.build_router();
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("HTTP server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("HTTP server shutting down");
            })
            .await?;

        Ok(())
    }
}
