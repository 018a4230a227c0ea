use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::util::ServiceExt;
use triton_openai_adapter::{
    backend::{mock::MockBackend, BackendError, GenerateRequest, InferenceBackend, InferenceResult},
    build_app,
    config::AdapterConfig,
    registry::ResolvedBackend,
    state::AppState,
};

/// Answers only after `delay`, to run past the request deadline.
struct SlowBackend {
    delay: Duration,
}

#[async_trait]
impl InferenceBackend for SlowBackend {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate(
        &self,
        _backend: &ResolvedBackend,
        request: GenerateRequest,
    ) -> Result<InferenceResult, BackendError> {
        tokio::time::sleep(self.delay).await;
        Ok(InferenceResult {
            raw_text: format!("{}too late", request.text_input),
        })
    }
}

fn app_with_deadline(deadline: Duration) -> Router {
    let config = AdapterConfig {
        stream_pacing: Duration::ZERO,
        request_deadline: deadline,
        ..AdapterConfig::default()
    };
    let backend = Arc::new(SlowBackend {
        delay: Duration::from_secs(5),
    });
    build_app(AppState::new(&config, backend))
}

fn app_with(backend: Arc<MockBackend>) -> Router {
    build_app(AppState::new_for_tests(backend))
}

fn post_chat(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_owned()))
        .expect("request build")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request build")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    String::from_utf8(bytes.to_vec()).expect("response body should be UTF-8")
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("response body should be JSON")
}

fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|event| event.strip_prefix("data: "))
        .map(ToOwned::to_owned)
        .collect()
}

#[tokio::test]
async fn one_shot_completion_strips_echoed_prompt() {
    let backend = Arc::new(MockBackend::echoing("Hello there"));
    let response = app_with(backend.clone())
        .oneshot(post_chat(
            r#"{"model":"mistral-nemo","messages":[{"role":"user","content":"Hi"}],"stream":false}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "mistral-nemo");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello there");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["completion_tokens"], 2);
    assert!(body["id"].as_str().is_some_and(|id| id.starts_with("chatcmpl-")));

    assert_eq!(backend.calls(), 1);
    let sent = backend.last_request().expect("backend saw a request");
    assert!(sent.text_input.ends_with("User: Hi\nAssistant: "));
    assert_eq!(sent.max_tokens, 512);
    assert!(!sent.stream);
}

#[tokio::test]
async fn unknown_model_is_rejected_without_backend_call() {
    let backend = Arc::new(MockBackend::default());
    let response = app_with(backend.clone())
        .oneshot(post_chat(
            r#"{"model":"unknown-model","messages":[{"role":"user","content":"Hi"}]}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["message"], "Model unknown-model not found");
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn unknown_model_in_stream_mode_is_still_an_http_error() {
    let backend = Arc::new(MockBackend::default());
    let response = app_with(backend.clone())
        .oneshot(post_chat(
            r#"{"model":"unknown-model","messages":[],"stream":true}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn unreachable_backend_maps_to_service_unavailable() {
    let backend = Arc::new(MockBackend::failing(BackendError::Unavailable(
        "connection refused".to_owned(),
    )));
    let response = app_with(backend)
        .oneshot(post_chat(
            r#"{"model":"llama3","messages":[{"role":"user","content":"Hi"}]}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    let message = body["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("cannot connect to backend"));
}

#[tokio::test]
async fn backend_status_is_passed_through() {
    let backend = Arc::new(MockBackend::failing(BackendError::Status {
        status: 400,
        body: "max_tokens exceeds model limit".to_owned(),
    }));
    let response = app_with(backend)
        .oneshot(post_chat(
            r#"{"model":"llama3","messages":[{"role":"user","content":"Hi"}],"max_tokens":99999}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["message"], "max_tokens exceeds model limit");
    assert_eq!(body["error"]["type"], "backend_error");
}

#[tokio::test]
async fn invalid_parameters_are_rejected_before_inference() {
    let backend = Arc::new(MockBackend::default());
    let app = app_with(backend.clone());

    let response = app
        .clone()
        .oneshot(post_chat(
            r#"{"model":"llama3","messages":[],"temperature":3.0}"#,
        ))
        .await
        .expect("request execution");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_chat("{not json"))
        .await
        .expect("request execution");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");

    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn streaming_replays_words_then_stop_then_done() {
    let backend = Arc::new(MockBackend::echoing("a b c"));
    let response = app_with(backend)
        .oneshot(post_chat(
            r#"{"model":"mistral-nemo","messages":[{"role":"user","content":"Hi"}],"stream":true}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(content_type.starts_with("text/event-stream"));

    let body = body_text(response).await;
    assert!(body.ends_with("data: [DONE]\n\n"));
    let payloads = sse_payloads(&body);
    assert_eq!(payloads.len(), 5);
    assert_eq!(payloads.iter().filter(|data| *data == "[DONE]").count(), 1);

    let chunks = payloads[..4]
        .iter()
        .map(|data| serde_json::from_str::<Value>(data).expect("chunk is JSON"))
        .collect::<Vec<_>>();
    let deltas = chunks[..3]
        .iter()
        .map(|chunk| chunk["choices"][0]["delta"]["content"].as_str().unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(deltas, vec!["a ", "b ", "c"]);
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(chunks[3]["choices"][0]["finish_reason"], "stop");
    assert!(chunks.iter().all(|chunk| chunk["id"] == chunks[0]["id"]));
    assert!(chunks.iter().all(|chunk| chunk["object"] == "chat.completion.chunk"));
}

#[tokio::test]
async fn streaming_failure_is_a_single_in_band_error_frame() {
    let backend = Arc::new(MockBackend::failing(BackendError::Status {
        status: 500,
        body: "model crashed".to_owned(),
    }));
    let response = app_with(backend)
        .oneshot(post_chat(
            r#"{"model":"llama3","messages":[{"role":"user","content":"Hi"}],"stream":true}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    let payloads = sse_payloads(&body_text(response).await);
    assert_eq!(payloads.len(), 1);
    let frame: Value = serde_json::from_str(&payloads[0]).expect("error frame is JSON");
    assert_eq!(frame["error"]["message"], "model crashed");
    assert_eq!(frame["error"]["code"], 500);
}

#[tokio::test]
async fn models_endpoint_lists_registered_models() {
    let response = app_with(Arc::new(MockBackend::default()))
        .oneshot(get("/v1/models"))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["object"], "list");
    let ids = body["data"]
        .as_array()
        .expect("data is an array")
        .iter()
        .map(|model| model["id"].as_str().unwrap_or_default().to_owned())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["mistral-nemo", "llama3"]);
    assert_eq!(body["data"][0]["object"], "model");
    assert_eq!(body["data"][0]["owned_by"], "triton");
}

#[tokio::test]
async fn health_reports_healthy() {
    let response = app_with(Arc::new(MockBackend::default()))
        .oneshot(get("/health"))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({"status": "healthy"}));
}

#[tokio::test]
async fn metrics_count_completed_requests() {
    let state = AppState::new_for_tests(Arc::new(MockBackend::echoing("ok")));
    let app = build_app(state.clone());

    let response = app
        .clone()
        .oneshot(post_chat(
            r#"{"model":"llama3","messages":[{"role":"user","content":"Hi"}]}"#,
        ))
        .await
        .expect("request execution");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/metrics")).await.expect("request execution");
    let body = body_text(response).await;
    assert!(body.contains("adapter_http_requests_total"));
    assert!(body.contains("status=\"200\""));
    assert_eq!(state.metrics.inflight(), 0);
}

#[tokio::test]
async fn deadline_expiry_is_service_unavailable() {
    let response = app_with_deadline(Duration::from_millis(50))
        .oneshot(post_chat(
            r#"{"model":"llama3","messages":[{"role":"user","content":"Hi"}]}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    let message = body["error"]["message"].as_str().unwrap_or_default();
    assert!(message.starts_with("request deadline of 50ms exceeded"), "{message}");
}

#[tokio::test]
async fn deadline_expiry_while_streaming_is_one_error_frame() {
    let response = app_with_deadline(Duration::from_millis(50))
        .oneshot(post_chat(
            r#"{"model":"llama3","messages":[{"role":"user","content":"Hi"}],"stream":true}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(!body.contains("[DONE]"));
    let payloads = sse_payloads(&body);
    assert_eq!(payloads.len(), 1);
    let frame: Value = serde_json::from_str(&payloads[0]).expect("error frame is JSON");
    assert_eq!(frame["error"]["code"], 503);
    assert_eq!(frame["error"]["type"], "backend_unavailable");
}

#[tokio::test]
async fn null_and_multipart_content_are_accepted() {
    let backend = Arc::new(MockBackend::echoing("ok"));
    let response = app_with(backend.clone())
        .oneshot(post_chat(
            r#"{"model":"llama3","messages":[
                {"role":"assistant","content":null},
                {"role":"user","content":[{"type":"text","text":"Hi"}]}
            ]}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    let sent = backend.last_request().expect("backend saw a request");
    assert!(sent.text_input.ends_with("Assistant: \nUser: Hi\nAssistant: "));
}

#[tokio::test]
async fn open_stream_counts_as_inflight_until_drained() {
    let state = AppState::new_for_tests(Arc::new(MockBackend::echoing("a b")));
    let response = build_app(state.clone())
        .oneshot(post_chat(
            r#"{"model":"llama3","messages":[{"role":"user","content":"Hi"}],"stream":true}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(state.metrics.inflight(), 1);
    let body = body_text(response).await;
    assert!(body.ends_with("data: [DONE]\n\n"));
    assert_eq!(state.metrics.inflight(), 0);
}
