use std::sync::Arc;

use weft_core::config::{GatewayConfig, ReplyConfig};
use weft_engine::WorkflowEngine;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub engine: Arc<WorkflowEngine>,
    pub replies: ReplyConfig,
}
