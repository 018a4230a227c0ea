use std::{sync::Arc, time::Duration};

use crate::{
    backend::InferenceBackend, config::AdapterConfig, metrics::AppMetrics,
    registry::ModelRegistry, stream::Pacing,
};

/// Per-request knobs, fixed at startup.
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub prompt_secret: String,
    pub default_model: String,
    pub pacing: Pacing,
    pub request_deadline: Duration,
}

impl From<&AdapterConfig> for RequestSettings {
    fn from(config: &AdapterConfig) -> Self {
        Self {
            prompt_secret: config.prompt_secret.clone(),
            default_model: config.default_model.clone(),
            pacing: Pacing::from_delay(config.stream_pacing),
            request_deadline: config.request_deadline,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub backend: Arc<dyn InferenceBackend>,
    pub settings: Arc<RequestSettings>,
    pub metrics: Arc<AppMetrics>,
}

impl AppState {
    pub fn new<B>(config: &AdapterConfig, backend: Arc<B>) -> Self
    where
        B: InferenceBackend + 'static,
    {
        Self {
            registry: Arc::new(ModelRegistry::new(
                config.endpoints.clone(),
                config.model_owner.clone(),
            )),
            backend,
            settings: Arc::new(RequestSettings::from(config)),
            metrics: Arc::new(AppMetrics::new()),
        }
    }

    /// Default model table with pacing disabled.
    pub fn new_for_tests<B>(backend: Arc<B>) -> Self
    where
        B: InferenceBackend + 'static,
    {
        let config = AdapterConfig {
            stream_pacing: Duration::ZERO,
            ..AdapterConfig::default()
        };
        Self::new(&config, backend)
    }
}
