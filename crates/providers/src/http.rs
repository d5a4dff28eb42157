//! HTTP upstream client.
//!
//! Protocol:
//! - `POST {base}/session` with `{"suffix": ...}` returns
//!   `{"identity": ..., "token": ...}`
//! - `POST {base}/completion` with `Cookie: sessionKey=<token>` streams SSE
//!   lines `data: {"completion": "..."}`; a `data: {"error": {...}}` line ends
//!   the stream with an error
//!
//! A proxy given per call overrides the client default.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokenrelay_core::{ConversationContext, SessionGrant, StreamItem, Upstream, UpstreamError};
use tokio::sync::mpsc::{self, Receiver};
use tracing::{debug, trace, warn};

const DEFAULT_BASE_URL: &str = "https://claude.ai/api";
const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// reqwest-backed [`Upstream`].
pub struct HttpUpstream {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new() -> Result<Self, UpstreamError> {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            timeout,
            client: build_client(timeout, None)?,
        })
    }

    /// Default base URL, used when a call does not name one.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, UpstreamError> {
        self.timeout = timeout;
        self.client = build_client(timeout, None)?;
        Ok(self)
    }

    fn client(&self, proxy: Option<&str>) -> Result<reqwest::Client, UpstreamError> {
        match proxy.filter(|p| !p.is_empty()) {
            Some(proxy) => build_client(self.timeout, Some(proxy)),
            None => Ok(self.client.clone()),
        }
    }

    fn url(&self, base_url: Option<&str>, path: &str) -> String {
        let base = base_url
            .filter(|b| !b.is_empty())
            .map(|b| b.trim_end_matches('/'))
            .unwrap_or(self.base_url.as_str());
        format!("{base}/{path}")
    }
}

fn build_client(timeout: Duration, proxy: Option<&str>) -> Result<reqwest::Client, UpstreamError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| UpstreamError::Network(format!("invalid proxy `{proxy}`: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| UpstreamError::Network(format!("failed to build HTTP client: {e}")))
}

/// Flatten a reqwest error and its sources into one line.
fn transport_error(e: reqwest::Error) -> UpstreamError {
    let mut text = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    if e.is_timeout() {
        UpstreamError::Timeout(text)
    } else {
        // OS error texts differ in case between platforms
        UpstreamError::Network(text.to_lowercase())
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn name(&self) -> &str {
        "http"
    }

    async fn acquire_session(
        &self,
        base_url: Option<&str>,
        suffix: Option<&str>,
        proxy: Option<&str>,
    ) -> Result<SessionGrant, UpstreamError> {
        let url = self.url(base_url, "session");
        debug!(url = %url, "Requesting new session");

        let response = self
            .client(proxy)?
            .post(&url)
            .json(&SessionRequest { suffix })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Session acquisition rejected");
            return Err(UpstreamError::Session(error_text(&body)));
        }

        response
            .json::<SessionGrant>()
            .await
            .map_err(|e| UpstreamError::Session(format!("malformed session response: {e}")))
    }

    async fn submit(
        &self,
        context: &ConversationContext,
    ) -> Result<Receiver<StreamItem>, UpstreamError> {
        let url = self.url(context.base_url.as_deref(), "completion");
        let body = CompletionRequest {
            conversation_id: &context.id,
            prompt: &context.prompt,
            model: context.model.upstream_model(),
            bot: &context.bot,
            app_id: context.app_id.as_deref(),
        };

        debug!(url = %url, conversation = %context.id, prompt_len = context.prompt.len(), "Submitting prompt");

        let response = self
            .client(context.proxy.as_deref())?
            .post(&url)
            .header(reqwest::header::COOKIE, format!("sessionKey={}", context.token))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Completion request rejected");
            return Err(UpstreamError::Api {
                status_code: status,
                message: error_text(&body),
            });
        }

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(UpstreamError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&line);
                    match parse_line(line.trim_end()) {
                        Event::Text(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                trace!("Receiver dropped, stopping upstream read");
                                return;
                            }
                        }
                        Event::Error(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                        Event::Done => return,
                        Event::Skip => {}
                    }
                }
            }

            let rest = String::from_utf8_lossy(&buffer);
            match parse_line(rest.trim_end()) {
                Event::Text(text) => {
                    let _ = tx.send(Ok(text)).await;
                }
                Event::Error(e) => {
                    let _ = tx.send(Err(e)).await;
                }
                Event::Done | Event::Skip => {}
            }
        });

        Ok(rx)
    }
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    suffix: Option<&'a str>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    conversation_id: &'a str,
    prompt: &'a str,
    model: &'a str,
    bot: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    completion: Option<String>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl ErrorBody {
    fn text(&self) -> String {
        match (self.kind.is_empty(), self.message.is_empty()) {
            (true, _) => self.message.clone(),
            (false, true) => self.kind.clone(),
            (false, false) => format!("{}: {}", self.kind, self.message),
        }
    }
}

#[derive(Debug)]
enum Event {
    Text(String),
    Error(UpstreamError),
    Done,
    Skip,
}

fn parse_line(line: &str) -> Event {
    let Some(data) = line.strip_prefix("data:") else {
        return Event::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Event::Done;
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(StreamEvent {
            error: Some(error), ..
        }) => Event::Error(UpstreamError::Api {
            status_code: 200,
            message: error.text(),
        }),
        Ok(StreamEvent {
            completion: Some(text),
            ..
        }) if !text.is_empty() => Event::Text(text),
        Ok(_) => Event::Skip,
        Err(e) => {
            trace!(error = %e, data = %data, "Ignoring unparseable SSE data");
            Event::Skip
        }
    }
}

/// Error text from a non-200 body: the `{"error": {...}}` envelope if there
/// is one, the raw body otherwise.
fn error_text(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.text(),
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use tokenrelay_core::{ModelFamily, StreamMode, TransformOptions};

    #[test]
    fn parse_text_done_and_noise() {
        assert!(matches!(parse_line(r#"data: {"completion": "hi"}"#), Event::Text(t) if t == "hi"));
        assert!(matches!(parse_line(r#"data:{"completion":"x"}"#), Event::Text(t) if t == "x"));
        assert!(matches!(parse_line("data: [DONE]"), Event::Done));
        assert!(matches!(parse_line(": keep-alive"), Event::Skip));
        assert!(matches!(parse_line("event: completion"), Event::Skip));
        assert!(matches!(parse_line("data: {not json"), Event::Skip));
        assert!(matches!(parse_line(r#"data: {"completion": ""}"#), Event::Skip));
    }

    #[test]
    fn parse_error_event_keeps_type_and_message() {
        let event = parse_line(
            r#"data: {"error": {"type": "rate_limit_error", "message": "slow down"}}"#,
        );
        match event {
            Event::Error(UpstreamError::Api { message, .. }) => {
                assert_eq!(message, "rate_limit_error: slow down");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_text_prefers_envelope() {
        assert_eq!(
            error_text(r#"{"error": {"type": "permission_error", "message": "Account in read-only mode"}}"#),
            "permission_error: Account in read-only mode"
        );
        assert_eq!(error_text("  plain failure\n"), "plain failure");
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn context(token: &str, base_url: &str) -> ConversationContext {
        ConversationContext {
            id: ModelFamily::Web.conversation_id(),
            token: token.into(),
            prompt: "Human: hi".into(),
            bot: "claude".into(),
            model: ModelFamily::Web,
            proxy: None,
            base_url: Some(base_url.into()),
            app_id: None,
            transform: TransformOptions::new(StreamMode::Delta),
        }
    }

    async fn drain(mut rx: Receiver<StreamItem>) -> Vec<StreamItem> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn streams_completion_events() {
        let app = Router::new().route(
            "/completion",
            post(|headers: HeaderMap| async move {
                let cookie = headers
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                assert_eq!(cookie, "sessionKey=sk-test");
                "data: {\"completion\": \"A: Hel\"}\n\n: ping\n\ndata: {\"completion\": \"lo\"}\n\ndata: [DONE]\n\n"
            }),
        );
        let base = serve(app).await;

        let upstream = HttpUpstream::new().unwrap();
        let rx = upstream.submit(&context("sk-test", &base)).await.unwrap();
        let texts: Vec<String> = drain(rx).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["A: Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn error_event_ends_stream() {
        let app = Router::new().route(
            "/completion",
            post(|| async {
                "data: {\"completion\": \"x\"}\n\ndata: {\"error\": {\"type\": \"overloaded\", \"message\": \"busy\"}}\n\ndata: {\"completion\": \"never\"}\n\n"
            }),
        );
        let base = serve(app).await;

        let upstream = HttpUpstream::new().unwrap();
        let items = drain(upstream.submit(&context("t", &base)).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(UpstreamError::Api { message, .. }) if message == "overloaded: busy"));
    }

    #[tokio::test]
    async fn non_200_status_is_an_api_error() {
        let app = Router::new().route(
            "/completion",
            post(|| async {
                (
                    axum::http::StatusCode::TOO_MANY_REQUESTS,
                    r#"{"error": {"type": "rate_limit_error", "message": "limited"}}"#,
                )
            }),
        );
        let base = serve(app).await;

        let upstream = HttpUpstream::new().unwrap();
        let err = upstream.submit(&context("t", &base)).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Api { status_code: 429, .. }));
        assert!(err.to_string().contains("rate_limit_error"));
    }

    #[tokio::test]
    async fn acquires_session() {
        let app = Router::new().route(
            "/session",
            post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                assert_eq!(body["suffix"], "example.org");
                axum::Json(serde_json::json!({"identity": "a@example.org", "token": "sk-new"}))
            }),
        );
        let base = serve(app).await;

        let upstream = HttpUpstream::new().unwrap().with_base_url(format!("{base}/"));
        let grant = upstream
            .acquire_session(None, Some("example.org"), None)
            .await
            .unwrap();
        assert_eq!(grant.identity, "a@example.org");
        assert_eq!(grant.token, "sk-new");
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = HttpUpstream::new().unwrap();
        let err = upstream
            .acquire_session(Some(&format!("http://{addr}")), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Network(_)));
    }

    #[test]
    fn empty_proxy_uses_default_client() {
        let upstream = HttpUpstream::new().unwrap();
        assert!(upstream.client(Some("")).is_ok());
        assert!(upstream.client(Some("http://127.0.0.1:7890")).is_ok());
    }
}
