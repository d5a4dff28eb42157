//! The per-request submission unit handed to the upstream client.

use crate::model::ModelFamily;
use serde::{Deserialize, Serialize};

/// How an upstream stream delivers text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Each item carries only the new text.
    Delta,
    /// Each item carries the whole transcript so far.
    Snapshot,
}

/// Flags that configure the marker engine bound to a context's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    pub mode: StreamMode,

    /// Stop output at a `H:` marker seen after the reply began.
    pub terminate_on_human: bool,

    /// Stop output at a `System:` marker seen after the reply began.
    pub terminate_on_system: bool,

    /// Log buffer contents and marker offsets at every step.
    pub debug: bool,
}

impl TransformOptions {
    pub fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            terminate_on_human: true,
            terminate_on_system: false,
            debug: false,
        }
    }
}

/// One request's submission unit.
///
/// Built once per attempt and discarded when the stream completes or the
/// client goes away. Never persisted.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Conversation identifier (see [`ModelFamily::conversation_id`]).
    pub id: String,

    /// The effective session credential.
    pub token: String,

    /// Fully assembled outbound prompt.
    pub prompt: String,

    /// Upstream bot identifier.
    pub bot: String,

    pub model: ModelFamily,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Application id, present only for families that require it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    pub transform: TransformOptions,
}

impl std::fmt::Debug for ConversationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationContext")
            .field("id", &self.id)
            .field("token", &crate::upstream::mask(&self.token))
            .field("prompt_len", &self.prompt.len())
            .field("bot", &self.bot)
            .field("model", &self.model)
            .field("proxy", &self.proxy)
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("transform", &self.transform)
            .finish()
    }
}
