//! `POST /v1/complete`: request decoding and delivery (SSE or one JSON body).

use crate::SharedState;
use crate::completion::{ChunkSink, CompletionRequest, Outcome, UnarySink};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderName};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokenrelay_core::HistoryMessage;
use tokenrelay_engine::CancelProbe;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Header carrying the upstream credential (or `auto`).
pub const API_KEY_HEADER: &str = "x-api-key";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");
const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Inbound completion request.
///
/// Sampling parameters are accepted for compatibility and not forwarded.
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    #[serde(default)]
    pub prompt: String,
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
    #[serde(default)]
    pub max_tokens_to_sample: Option<u32>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionBody {
    pub completion: String,
}

pub async fn complete_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<CompleteRequest>,
) -> Response {
    let credential = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_string();

    info!(
        model = %payload.model,
        stream = payload.stream,
        history = payload.messages.len(),
        prompt_len = payload.prompt.len(),
        "v1/complete request"
    );

    let stream = payload.stream;
    let request = CompletionRequest {
        prompt: payload.prompt,
        model: payload.model,
        history: payload.messages,
        credential,
    };

    if stream {
        stream_response(state, request)
    } else {
        unary_response(state, request).await
    }
}

async fn unary_response(state: SharedState, request: CompletionRequest) -> Response {
    let completion = match state.service.run(&request, &mut UnarySink).await {
        Outcome::Completed(text) => text,
        Outcome::Failed(message) => format!("Error: {message}"),
        Outcome::Disconnected => String::new(),
    };
    (StatusCode::OK, Json(CompletionBody { completion })).into_response()
}

fn stream_response(state: SharedState, request: CompletionRequest) -> Response {
    let (tx, rx) = mpsc::channel::<Result<String, Infallible>>(32);

    tokio::spawn(async move {
        let mut sink = SseSink::new(tx);
        let outcome = state.service.run(&request, &mut sink).await;
        sink.finish(outcome).await;
    });

    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

/// One `data:` frame carrying `text` as the completion.
pub fn frame(text: &str) -> String {
    format!("data: {}\n\n", serde_json::json!({ "completion": text }))
}

/// Streaming delivery over the response body channel.
///
/// The client dropping the body closes the channel, which is what the marker
/// engine polls to stop early.
pub struct SseSink {
    tx: mpsc::Sender<Result<String, Infallible>>,
    written: usize,
}

impl SseSink {
    pub fn new(tx: mpsc::Sender<Result<String, Infallible>>) -> Self {
        Self { tx, written: 0 }
    }

    async fn push(&self, data: String) -> bool {
        self.tx.send(Ok(data)).await.is_ok()
    }

    /// Write the error frame (if any) and the terminator.
    pub async fn finish(self, outcome: Outcome) {
        match outcome {
            Outcome::Completed(_) => {}
            Outcome::Failed(message) => {
                if !self.push(frame(&format!("Error: {message}"))).await {
                    return;
                }
            }
            Outcome::Disconnected => {
                debug!(written = self.written, "Stream abandoned by client");
                return;
            }
        }
        self.push(DONE_FRAME.to_string()).await;
    }
}

#[async_trait]
impl ChunkSink for SseSink {
    async fn send(&mut self, chunk: &str) -> bool {
        if chunk.is_empty() {
            return !self.tx.is_closed();
        }
        if !self.push(frame(chunk)).await {
            return false;
        }
        self.written += 1;
        true
    }

    fn written(&self) -> usize {
        self.written
    }

    fn cancel_probe(&self) -> Option<CancelProbe> {
        let tx = self.tx.clone();
        Some(Arc::new(move || tx.is_closed()))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
