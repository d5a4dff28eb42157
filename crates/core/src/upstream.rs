//! Upstream trait: the abstraction over the model provider client.
//!
//! The gateway never talks to the provider directly. It asks an [`Upstream`]
//! for a session credential and, given a [`ConversationContext`], for a
//! channel of raw stream items. Everything the provider sends back flows
//! through that channel until it closes.

use crate::context::ConversationContext;
use crate::error::UpstreamError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Receiver;

/// One raw item from the upstream stream: new text, or a terminal error.
pub type StreamItem = Result<String, UpstreamError>;

/// A freshly acquired session.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionGrant {
    /// Account identity the session belongs to (an email address, usually).
    pub identity: String,

    /// The session credential.
    pub token: String,
}

impl std::fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGrant")
            .field("identity", &self.identity)
            .field("token", &mask(&self.token))
            .finish()
    }
}

/// The provider client.
///
/// Implementations: HTTP (see `tokenrelay-providers`) and scripted mocks in
/// tests.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// A human-readable name for this client.
    fn name(&self) -> &str;

    /// Obtain a new session credential.
    async fn acquire_session(
        &self,
        base_url: Option<&str>,
        suffix: Option<&str>,
        proxy: Option<&str>,
    ) -> Result<SessionGrant, UpstreamError>;

    /// Submit a prompt and get the raw item stream.
    ///
    /// The channel closes when the provider finishes. A failure before the
    /// stream starts is returned directly; a failure after it started arrives
    /// as an `Err` item.
    async fn submit(
        &self,
        context: &ConversationContext,
    ) -> Result<Receiver<StreamItem>, UpstreamError>;
}

/// Shorten a credential for logs: first 8 characters + `…`.
pub fn mask(token: &str) -> String {
    let head: String = token.chars().take(8).collect();
    if head.len() < token.len() {
        format!("{head}…")
    } else {
        head
    }
}
