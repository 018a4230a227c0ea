use std::{
    convert::Infallible,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header::CONTENT_TYPE,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    backend::{GenerateRequest, InferenceBackend},
    errors::AppError,
    metrics::{AppMetrics, InflightGuard},
    models::{ChatCompletionsRequest, ChatCompletionsResponse, ChatRequest, Usage},
    normalize::normalize,
    prompt,
    registry::{ModelList, ResolvedBackend},
    state::AppState,
    stream::StreamEmulator,
};

const CHAT_PATH: &str = "/v1/chat/completions";

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    Json(state.registry.list(unix_timestamp()))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Internal(format!("metrics render failed: {error}")).into_response(),
    }
}

pub async fn chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<ChatCompletionsRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let inflight = state.metrics.inflight_guard();
    let stream = payload
        .as_ref()
        .map(|Json(request)| request.stream)
        .unwrap_or(false);

    let response = match process_chat_completions(state.clone(), payload, inflight).await {
        Ok(response) => response,
        Err(error) => {
            match &error {
                AppError::Internal(message) => error!(error = %message, "chat request failed"),
                other => info!(status = other.status().as_u16(), error = %other, "chat request rejected"),
            }
            error.into_response()
        }
    };

    state.metrics.observe_request(
        CHAT_PATH,
        "POST",
        stream,
        response.status().as_u16(),
        started.elapsed(),
    );

    response
}

async fn process_chat_completions(
    state: AppState,
    payload: Result<Json<ChatCompletionsRequest>, JsonRejection>,
    inflight: InflightGuard,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let request = request
        .into_validated(&state.settings.default_model)
        .map_err(AppError::BadRequest)?;

    let target = state
        .registry
        .resolve(&request.model)
        .cloned()
        .ok_or_else(|| AppError::NotFound(request.model.clone()))?;

    let prompt = prompt::assemble(&request.messages, &state.settings.prompt_secret);
    info!(
        request_id = %request.request_id,
        model = %request.model,
        stream = request.stream,
        messages = request.messages.len(),
        max_tokens = request.max_tokens,
        "chat request accepted"
    );

    let inference = Inference {
        backend: state.backend.clone(),
        target,
        prompt,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        deadline: state.settings.request_deadline,
    };

    if request.stream {
        Ok(stream_completion(&state, request, inference, inflight))
    } else {
        one_shot_completion(&state, request, inference).await
    }
}

struct Completion {
    text: String,
    usage: Usage,
}

/// One backend round trip for an already-resolved request.
struct Inference {
    backend: Arc<dyn InferenceBackend>,
    target: ResolvedBackend,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
    deadline: Duration,
}

impl Inference {
    async fn run(self) -> Result<Completion, AppError> {
        let request = GenerateRequest::new(self.prompt.clone(), self.max_tokens, self.temperature);
        let result = timeout(self.deadline, self.backend.generate(&self.target, request))
            .await
            .map_err(|_| {
                AppError::BackendUnavailable(format!(
                    "request deadline of {:?} exceeded waiting for {}",
                    self.deadline, self.target.base_address
                ))
            })??;

        let text = normalize(&result.raw_text, &self.prompt);
        let usage = Usage::approximate(&self.prompt, &text);
        debug!(
            model = %self.target.model_id,
            preview = %text.chars().take(100).collect::<String>(),
            "completion normalized"
        );
        Ok(Completion { text, usage })
    }
}

fn record_failure(metrics: &AppMetrics, request_id: &str, stream: bool, error: &AppError) {
    metrics.observe_backend_error(stream, error);
    warn!(request_id = %request_id, stream, error = %error, "inference failed");
}

async fn one_shot_completion(
    state: &AppState,
    request: ChatRequest,
    inference: Inference,
) -> Result<Response, AppError> {
    let created = unix_timestamp();
    let response_id = format!("chatcmpl-{}", Uuid::new_v4());

    let completion = inference.run().await.map_err(|error| {
        record_failure(&state.metrics, &request.request_id, false, &error);
        error
    })?;
    state.metrics.observe_usage(&completion.usage);
    info!(
        request_id = %request.request_id,
        completion_tokens = completion.usage.completion_tokens,
        "chat request completed"
    );

    let payload = ChatCompletionsResponse::new(
        response_id,
        created,
        request.model,
        completion.text,
        completion.usage,
    );
    Ok(Json(payload).into_response())
}

/// Headers go out before the backend is called, so failures from here on
/// become an in-band error frame instead of an HTTP status.
fn stream_completion(
    state: &AppState,
    request: ChatRequest,
    inference: Inference,
    inflight: InflightGuard,
) -> Response {
    let emulator = StreamEmulator::new(
        request.model.clone(),
        unix_timestamp(),
        state.settings.pacing,
    );
    let metrics = state.metrics.clone();
    let request_id = request.request_id;
    debug!(request_id = %request_id, stream_id = emulator.id(), "stream opened");

    let completion = async move {
        match inference.run().await {
            Ok(completion) => {
                metrics.observe_usage(&completion.usage);
                Ok(completion.text)
            }
            Err(error) => {
                record_failure(&metrics, &request_id, true, &error);
                Err(error)
            }
        }
    };

    // Gauge drops with the body, not with the handler.
    let events = async_stream::stream! {
        let _inflight = inflight;
        let frames = emulator.emit(completion);
        tokio::pin!(frames);
        while let Some(frame) = frames.next().await {
            yield Ok::<Event, Infallible>(frame.into_event());
        }
    };

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(10)))
        .into_response()
}

fn unix_timestamp() -> i64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_secs() as i64
}
