pub mod mock;
pub mod triton;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ResolvedBackend;

/// Body of `POST /v2/models/<model>/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub text_input: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

impl GenerateRequest {
    pub fn new(prompt: String, max_tokens: u32, temperature: f32) -> Self {
        Self {
            text_input: prompt,
            max_tokens,
            temperature,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceResult {
    #[serde(rename = "text_output")]
    pub raw_text: String,
}

/// One non-streaming generate call per request. Implementations must not
/// retry: a repeated call repeats the whole generation.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(
        &self,
        backend: &ResolvedBackend,
        request: GenerateRequest,
    ) -> Result<InferenceResult, BackendError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("cannot connect to backend: {0}")]
    Unavailable(String),
    #[error("backend timeout: {0}")]
    Timeout(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend invalid response: {0}")]
    InvalidResponse(String),
    #[error("backend request could not be built: {0}")]
    Misconfigured(String),
}
