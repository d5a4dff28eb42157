//! # tokenrelay core
//!
//! Domain types, traits, and error definitions for the tokenrelay completion
//! gateway. This crate has **no framework dependencies**: it defines the
//! domain model that the engine, session, provider, and gateway crates
//! implement against.
//!
//! The upstream model provider is reached only through the [`Upstream`]
//! trait, so every other crate can be tested against scripted mocks.

pub mod context;
pub mod error;
pub mod i18n;
pub mod message;
pub mod model;
pub mod upstream;

// Re-export key types at crate root for ergonomics
pub use context::{ConversationContext, StreamMode, TransformOptions};
pub use error::{RequestError, UpstreamError};
pub use i18n::{Locale, MessageKey};
pub use message::{HistoryMessage, Role};
pub use model::ModelFamily;
pub use upstream::{SessionGrant, StreamItem, Upstream};

/// The credential value that asks the gateway to use its shared session token.
pub const AUTO_TOKEN: &str = "auto";
