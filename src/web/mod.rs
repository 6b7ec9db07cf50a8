//! Web server module: the webhook listener and the read-only status API.

mod handlers;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::presence::Presence;

use axum::{
    extract::DefaultBodyLimit,
    routing::{any, get},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub presence: Arc<Presence>,
    pub store: Arc<Store>,
}

/// Web server for PeopleSense.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, presence: Arc<Presence>, store: Arc<Store>) -> Self {
        Self {
            state: AppState {
                config,
                presence,
                store,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/sensors", get(handlers::handle_get_sensors))
            .route("/api/sensors/{name}/history", get(handlers::handle_get_history))
            // Webhook, on any path
            .route("/", any(handlers::handle_webhook))
            .fallback(handlers::handle_webhook)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Webhook listener on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
