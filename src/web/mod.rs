//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
}

/// HTTP API for the dashboard and registry management.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<Store>) -> Self {
        Self {
            state: AppState { config, store },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            .route("/stats/overview", get(handlers::handle_overview))
            // Endpoint registry
            .route(
                "/apis",
                get(handlers::handle_list_apis).post(handlers::handle_create_api),
            )
            .route(
                "/apis/{id}",
                get(handlers::handle_get_api).delete(handlers::handle_delete_api),
            )
            .route("/apis/{id}/logs", get(handlers::handle_get_logs))
            // Subscribers
            .route(
                "/subscribers",
                get(handlers::handle_list_subscribers).post(handlers::handle_create_subscriber),
            )
            .route("/subscribers/{chat_id}", delete(handlers::handle_delete_subscriber))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Bind the configured port. Fails fast when the port is taken.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("API server listening on {}", addr);
        Ok(listener)
    }

    /// Serve on a bound listener until `shutdown` turns true.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        axum::serve(listener, self.routes())
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await?;

        tracing::info!("API server stopped");
        Ok(())
    }

    /// Bind and serve until `shutdown` turns true.
    pub async fn start(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }
}
