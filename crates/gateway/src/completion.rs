//! The completion cycle: credential, context, submission, stream consumption,
//! retried within a budget.

use async_trait::async_trait;
use std::sync::Arc;
use tokenrelay_core::{
    ConversationContext, HistoryMessage, Locale, MessageKey, ModelFamily, RequestError, Upstream,
    UpstreamError,
};
use tokenrelay_engine::{
    AssembledPrompt, AttemptState, CancelProbe, DEFAULT_BEGIN_THRESHOLD, ErrorClassifier,
    MarkerEngine, PromptAssembler, RetryBudget,
};
use tokenrelay_session::{ResolvedCredential, SessionError, SessionTokenManager};
use tracing::{debug, info, warn};

/// The provider's stock refusal. Seeing it means the shared account is flagged.
pub const REFUSAL: &str = "I apologize, but I will not provide any responses that violate Anthropic's Acceptable Use Policy or could promote harm.";

const BOT: &str = "claude";

/// Where cleaned chunks go.
#[async_trait]
pub trait ChunkSink: Send {
    /// Deliver one chunk. `false` once the client is gone.
    async fn send(&mut self, chunk: &str) -> bool;

    /// Number of chunks the client has actually received.
    fn written(&self) -> usize;

    /// Polled by the marker engine before every pull.
    fn cancel_probe(&self) -> Option<CancelProbe> {
        None
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Non-streaming delivery: nothing reaches the client until the cycle is
/// over, so every attempt may be retried.
#[derive(Debug, Default)]
pub struct UnarySink;

#[async_trait]
impl ChunkSink for UnarySink {
    async fn send(&mut self, _chunk: &str) -> bool {
        true
    }

    fn written(&self) -> usize {
        0
    }
}

/// One inbound request, already decoded.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub history: Vec<HistoryMessage>,
    /// The credential header value: a token, `token,app-id`, or `auto`.
    pub credential: String,
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The reply (possibly empty once the budget is spent).
    Completed(String),
    /// A final, localized failure message.
    Failed(String),
    /// The client went away; nothing more should be written.
    Disconnected,
}

/// Knobs for [`CompletionService`].
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub base_url: Option<String>,
    pub proxy: Option<String>,
    pub begin_threshold: usize,
    pub retry_budget: u32,
    pub locale: Locale,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            proxy: None,
            begin_threshold: DEFAULT_BEGIN_THRESHOLD,
            retry_budget: 2,
            locale: Locale::default(),
        }
    }
}

/// Runs requests end to end.
pub struct CompletionService {
    upstream: Arc<dyn Upstream>,
    sessions: Arc<SessionTokenManager>,
    assembler: PromptAssembler,
    classifier: ErrorClassifier,
    settings: CompletionSettings,
}

impl CompletionService {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        sessions: Arc<SessionTokenManager>,
        assembler: PromptAssembler,
        settings: CompletionSettings,
    ) -> Self {
        Self {
            upstream,
            sessions,
            assembler,
            classifier: ErrorClassifier::new(settings.locale),
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTokenManager> {
        &self.sessions
    }

    pub fn locale(&self) -> Locale {
        self.settings.locale
    }

    /// Run the full cycle, writing chunks to `sink` as they are produced.
    pub async fn run(&self, request: &CompletionRequest, sink: &mut dyn ChunkSink) -> Outcome {
        let family = match ModelFamily::parse(&request.model) {
            Ok(family) => family,
            Err(e) => return self.rejected(e),
        };
        let assembled = match self
            .assembler
            .prepare(&request.prompt, &request.history, family)
        {
            Ok(assembled) => assembled,
            Err(e) => return self.rejected(e),
        };

        let mut budget = RetryBudget::new(self.settings.retry_budget);
        let mut state = AttemptState::Pending;
        let mut attempt = 0u32;

        loop {
            match state {
                AttemptState::Done(outcome) => return outcome,
                AttemptState::Retry => {
                    info!(attempt, remaining = budget.remaining(), "Retrying completion");
                }
                AttemptState::Pending => {}
            }
            attempt += 1;

            let credential = match self.sessions.resolve(&request.credential, family).await {
                Ok(credential) => credential,
                Err(SessionError::Request(e)) => return self.rejected(e),
                Err(SessionError::Acquire(e)) => {
                    let classified = self.classifier.classify(&e.to_string());
                    warn!(category = ?classified.category, error = %e, "Credential acquisition failed");
                    return Outcome::Failed(classified.message);
                }
            };

            state = self
                .attempt(&credential, family, &assembled, sink, &mut budget)
                .await;
        }
    }

    async fn attempt(
        &self,
        credential: &ResolvedCredential,
        family: ModelFamily,
        assembled: &AssembledPrompt,
        sink: &mut dyn ChunkSink,
        budget: &mut RetryBudget,
    ) -> AttemptState<Outcome> {
        let context = ConversationContext {
            id: family.conversation_id(),
            token: credential.token.clone(),
            prompt: assembled.text.clone(),
            bot: BOT.to_string(),
            model: family,
            proxy: self.settings.proxy.clone(),
            base_url: self.settings.base_url.clone(),
            app_id: credential.app_id.clone(),
            transform: assembled.schema.transform_options(family.stream_mode()),
        };
        debug!(?context, "Submitting");

        let rx = match self.upstream.submit(&context).await {
            Ok(rx) => rx,
            Err(e) => return self.failed(e, credential, sink, budget),
        };

        let mut engine = MarkerEngine::new(rx, context.transform)
            .with_begin_threshold(self.settings.begin_threshold)
            .with_locale(self.settings.locale);
        if let Some(probe) = sink.cancel_probe() {
            engine = engine.with_cancel(probe);
        }

        loop {
            match engine.next_chunk().await {
                Ok(Some(chunk)) => {
                    if !sink.send(&chunk).await {
                        debug!("Client disconnected mid-stream");
                        return AttemptState::Done(Outcome::Disconnected);
                    }
                }
                Ok(None) => break,
                Err(e) => return self.failed(e, credential, sink, budget),
            }
        }

        if sink.is_closed() {
            debug!("Client disconnected");
            return AttemptState::Done(Outcome::Disconnected);
        }

        let reply = engine.delivered().to_string();
        self.check_refusal(&reply, credential, family);

        if reply.is_empty() && sink.written() == 0 {
            warn!(remaining = budget.remaining(), "Empty completion");
            return AttemptState::retry_or(budget, Outcome::Completed(reply));
        }
        AttemptState::Done(Outcome::Completed(reply))
    }

    fn failed(
        &self,
        error: UpstreamError,
        credential: &ResolvedCredential,
        sink: &dyn ChunkSink,
        budget: &mut RetryBudget,
    ) -> AttemptState<Outcome> {
        let classified = self.classifier.classify(&error.to_string());
        warn!(
            category = ?classified.category,
            invalidate = classified.invalidate,
            shared = credential.shared,
            error = %error,
            "Upstream failure"
        );

        if !classified.invalidate {
            return AttemptState::Done(Outcome::Failed(classified.message));
        }
        if credential.shared {
            self.sessions.invalidate_if(&credential.token);
        }
        if sink.written() > 0 {
            return AttemptState::Done(Outcome::Failed(classified.message));
        }
        AttemptState::retry_or(budget, Outcome::Failed(classified.message))
    }

    fn check_refusal(&self, reply: &str, credential: &ResolvedCredential, family: ModelFamily) {
        if credential.shared && family == ModelFamily::Web && reply.contains(REFUSAL) {
            self.sessions.invalidate_if(&credential.token);
            warn!("{}", self.settings.locale.text(MessageKey::RefusalDetected));
        }
    }

    fn rejected(&self, error: RequestError) -> Outcome {
        let locale = self.settings.locale;
        let message = match &error {
            RequestError::UnknownModel(model) => {
                format!("{}: {model}", locale.text(MessageKey::UnknownModel))
            }
            RequestError::MissingAppId => locale.text(MessageKey::MissingAppId).to_string(),
            RequestError::InvalidSchema(_) => error.to_string(),
        };
        debug!(error = %error, "Request rejected");
        Outcome::Failed(message)
    }
}
