use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    backend::{BackendError, GenerateRequest, InferenceBackend, InferenceResult},
    registry::ResolvedBackend,
};

#[derive(Clone)]
pub struct TritonClient {
    client: reqwest::Client,
}

impl TritonClient {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| format!("failed to build Triton HTTP client: {error}"))?;
        Ok(Self { client })
    }

    fn url(backend: &ResolvedBackend) -> String {
        format!(
            "{}/v2/models/{}/generate",
            backend.base_address.trim_end_matches('/'),
            backend.model_id
        )
    }
}

#[async_trait]
impl InferenceBackend for TritonClient {
    fn name(&self) -> &str {
        "triton"
    }

    async fn generate(
        &self,
        backend: &ResolvedBackend,
        request: GenerateRequest,
    ) -> Result<InferenceResult, BackendError> {
        let started = Instant::now();
        let response = self
            .client
            .post(Self::url(backend))
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown backend error".to_owned());
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result = response
            .json::<InferenceResult>()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    BackendError::Timeout(error.to_string())
                } else {
                    BackendError::InvalidResponse(error.to_string())
                }
            })?;

        debug!(
            backend = self.name(),
            model = %backend.model_id,
            latency_ms = started.elapsed().as_millis() as u64,
            output_chars = result.raw_text.len(),
            "generate completed"
        );
        Ok(result)
    }
}

/// Only reachability problems are transient. A request that could not be
/// built fails the same way on every attempt.
fn map_transport_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout(error.to_string())
    } else if error.is_builder() {
        BackendError::Misconfigured(error.to_string())
    } else if error.is_connect() || error.is_request() {
        BackendError::Unavailable(error.to_string())
    } else {
        BackendError::InvalidResponse(error.to_string())
    }
}
