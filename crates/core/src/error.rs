//! Error types for the tokenrelay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

// --- Bounded context errors ---

/// A request that can never succeed as sent.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("unknown model `{0}`")]
    UnknownModel(String),

    #[error("an application id must follow the token in the credential header (token,app-id)")]
    MissingAppId,

    #[error("invalid schema block: {0}")]
    InvalidSchema(String),
}

/// Failures reported by the upstream provider client.
///
/// The display text carries the provider's own wording, because the error
/// classifier works on substrings of it.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("{message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("session acquisition failed: {0}")]
    Session(String),

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("request timed out: {0}")]
    Timeout(String),
}
