pub mod backend;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod prompt;
pub mod registry;
pub mod state;
pub mod stream;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use backend::triton::TritonClient;
use config::AdapterConfig;
use tracing::info;

pub fn build_state(config: &AdapterConfig) -> Result<state::AppState, std::io::Error> {
    let client = TritonClient::new(config.backend_timeout).map_err(std::io::Error::other)?;
    let state = state::AppState::new(config, Arc::new(client));

    info!(
        models = %state.registry.model_ids().collect::<Vec<_>>().join(","),
        timeout_secs = config.backend_timeout.as_secs(),
        pacing_ms = config.stream_pacing.as_millis() as u64,
        "model registry configured"
    );
    Ok(state)
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .with_state(state)
}
