use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use weft_core::config::{GatewayConfig, ReplyConfig};
use weft_engine::WorkflowEngine;

use crate::routes;
use crate::state::AppState;

/// Build the HTTP routes over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/webhook", post(routes::webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP trigger for a workflow engine, built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    engine: Arc<WorkflowEngine>,
    replies: ReplyConfig,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, engine: Arc<WorkflowEngine>, replies: ReplyConfig) -> Self {
        Self {
            config,
            engine,
            replies,
        }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            engine: self.engine.clone(),
            replies: self.replies.clone(),
        });
        let app = router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(
            bind = %self.config.bind,
            workflow = %self.engine.definition().name,
            auth = self.config.token.is_some(),
            "Gateway listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
