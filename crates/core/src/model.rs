//! The closed set of model identifiers the gateway accepts.

use crate::context::StreamMode;
use crate::error::RequestError;
use serde::{Deserialize, Serialize};

/// Upstream model family, selected from the inbound `model` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// `claude-2` / `claude-2.0`: web conversations, incremental deltas.
    Web,
    /// `claude-1.x`: workspace-bot conversations, cumulative snapshots,
    /// one shared conversation per application.
    Slack,
}

impl ModelFamily {
    /// Resolve an inbound model identifier.
    pub fn parse(model: &str) -> Result<Self, RequestError> {
        match model {
            "claude-2" | "claude-2.0" => Ok(Self::Web),
            "claude-1.0" | "claude-1.2" | "claude-1.3" => Ok(Self::Slack),
            other => Err(RequestError::UnknownModel(other.to_string())),
        }
    }

    /// The upstream model name sent with each submission.
    pub fn upstream_model(&self) -> &'static str {
        match self {
            Self::Web => "claude-2.0",
            Self::Slack => "claude-1.0",
        }
    }

    /// How this family's stream delivers text.
    pub fn stream_mode(&self) -> StreamMode {
        match self {
            Self::Web => StreamMode::Delta,
            Self::Slack => StreamMode::Snapshot,
        }
    }

    /// Whether the credential must carry an application id (`token,app-id`).
    pub fn requires_app_id(&self) -> bool {
        matches!(self, Self::Slack)
    }

    /// Whether prompts for this family may be padded with filler.
    pub fn allows_padding(&self) -> bool {
        matches!(self, Self::Web)
    }

    /// Conversation id for a new submission.
    ///
    /// Slack conversations are scoped to the application, so the id is fixed.
    pub fn conversation_id(&self) -> String {
        match self {
            Self::Web => format!("claude-{}", uuid::Uuid::new_v4()),
            Self::Slack => "claude-slack".to_string(),
        }
    }
}
