//! Conversation history sent alongside a prompt.
//!
//! Clients that speak a chat-style API send prior turns as `messages`; the
//! prompt assembler folds them into one linear transcript before submission.

use serde::{Deserialize, Serialize};

/// The role of a history message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Any role the gateway does not know; rendered without a label.
    #[serde(other)]
    Other,
}

/// A single prior turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,

    #[serde(default)]
    pub content: String,
}

impl HistoryMessage {
    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}
