use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    backend::{BackendError, GenerateRequest, InferenceBackend, InferenceResult},
    registry::ResolvedBackend,
};

#[derive(Debug, Clone)]
enum Script {
    EchoThen(String),
    Raw(String),
    Fail(BackendError),
}

/// Scripted stand-in for Triton that records every call it receives.
#[derive(Debug)]
pub struct MockBackend {
    script: Script,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::echoing("Mock response")
    }
}

impl MockBackend {
    /// Replies with the prompt followed by `completion`, like a Triton
    /// ensemble that echoes its input.
    pub fn echoing(completion: impl Into<String>) -> Self {
        Self::with_script(Script::EchoThen(completion.into()))
    }

    /// Replies with exactly `text_output`, no echo.
    pub fn raw(text_output: impl Into<String>) -> Self {
        Self::with_script(Script::Raw(text_output.into()))
    }

    pub fn failing(error: BackendError) -> Self {
        Self::with_script(Script::Fail(error))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self, request: GenerateRequest) {
        if let Ok(mut guard) = self.last_request.lock() {
            *guard = Some(request);
        }
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        backend: &ResolvedBackend,
        request: GenerateRequest,
    ) -> Result<InferenceResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(model = %backend.model_id, "mock generate");

        let raw_text = match &self.script {
            Script::EchoThen(completion) => format!("{}{completion}", request.text_input),
            Script::Raw(text) => text.clone(),
            Script::Fail(error) => {
                self.record(request);
                return Err(error.clone());
            }
        };
        self.record(request);
        Ok(InferenceResult { raw_text })
    }
}
