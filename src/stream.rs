//! Emulated token streaming.
//!
//! Triton answers in one piece, so streamed responses are produced by
//! splitting the finished completion into words and replaying them as
//! `chat.completion.chunk` frames. Pacing is injected so the frame sequence
//! can be checked without real delays.

use std::{future::Future, time::Duration};

use axum::response::sse::Event;
use futures_util::Stream;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{errors::AppError, models::ChatCompletionsChunk};

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    Immediate,
    Fixed(Duration),
}

impl Pacing {
    pub fn from_delay(delay: Duration) -> Self {
        if delay.is_zero() {
            Self::Immediate
        } else {
            Self::Fixed(delay)
        }
    }

    async fn pause(self) {
        if let Self::Fixed(delay) = self {
            sleep(delay).await;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Chunk(ChatCompletionsChunk),
    Error(AppError),
    Done,
}

impl StreamFrame {
    /// Payload of the SSE `data:` field.
    pub fn data(&self) -> String {
        match self {
            StreamFrame::Chunk(chunk) => json_data(chunk),
            StreamFrame::Error(error) => json_data(&error.envelope()),
            StreamFrame::Done => DONE_SENTINEL.to_owned(),
        }
    }

    pub fn into_event(self) -> Event {
        Event::default().data(self.data())
    }
}

fn json_data<T: serde::Serialize>(payload: &T) -> String {
    match serde_json::to_string(payload) {
        Ok(serialized) => serialized,
        Err(error) => serde_json::json!({
            "error": {
                "message": format!("serialization error: {error}"),
                "type": "server_error"
            }
        })
        .to_string(),
    }
}

/// Every word but the last keeps one trailing space, so the deltas
/// concatenate back to the words joined by single spaces.
pub fn word_deltas(text: &str) -> Vec<String> {
    let words = text.split_whitespace().collect::<Vec<_>>();
    let last = words.len().saturating_sub(1);
    words
        .into_iter()
        .enumerate()
        .map(|(index, word)| {
            if index == last {
                word.to_owned()
            } else {
                format!("{word} ")
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct StreamEmulator {
    id: String,
    created: i64,
    model: String,
    pacing: Pacing,
}

impl StreamEmulator {
    pub fn new(model: impl Into<String>, created: i64, pacing: Pacing) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            created,
            model: model.into(),
            pacing,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The full frame sequence for a completed text: one delta per word, the
    /// terminal `stop` frame, then the sentinel.
    pub fn frames(&self, completion: &str) -> Vec<StreamFrame> {
        let mut frames = word_deltas(completion)
            .into_iter()
            .enumerate()
            .map(|(index, delta)| {
                StreamFrame::Chunk(ChatCompletionsChunk::delta(
                    &self.id,
                    self.created,
                    &self.model,
                    delta,
                    index == 0,
                ))
            })
            .collect::<Vec<_>>();
        frames.push(StreamFrame::Chunk(ChatCompletionsChunk::finish(
            &self.id,
            self.created,
            &self.model,
        )));
        frames.push(StreamFrame::Done);
        frames
    }

    /// Awaits `completion` and replays it as paced frames. A failed
    /// completion yields a single error frame and nothing after it.
    ///
    /// The returned stream is lazy; dropping it (client disconnect) cancels
    /// the pending completion future and any remaining frames.
    pub fn emit<F>(self, completion: F) -> impl Stream<Item = StreamFrame> + Send + 'static
    where
        F: Future<Output = Result<String, AppError>> + Send + 'static,
    {
        let emulator = self;
        async_stream::stream! {
            let mut guard = AbandonGuard::new(emulator.id.clone());
            match completion.await {
                Ok(text) => {
                    let frames = emulator.frames(&text);
                    let deltas = frames.len().saturating_sub(2);
                    debug!(stream_id = %emulator.id, deltas, "replaying completion");
                    for (index, frame) in frames.into_iter().enumerate() {
                        if matches!(frame, StreamFrame::Done) {
                            guard.complete();
                        }
                        yield frame;
                        if index < deltas {
                            emulator.pacing.pause().await;
                        }
                    }
                }
                Err(error) => {
                    guard.complete();
                    yield StreamFrame::Error(error);
                }
            }
        }
    }
}

struct AbandonGuard {
    stream_id: String,
    completed: bool,
}

impl AbandonGuard {
    fn new(stream_id: String) -> Self {
        Self {
            stream_id,
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.completed {
            info!(stream_id = %self.stream_id, "client disconnected, stream abandoned");
        }
    }
}
