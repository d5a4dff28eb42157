//! The gateway's transformation engine.
//!
//! - [`schema`]: directive block parsing
//! - [`prompt`]: history merging, trimming, canonicalization, padding
//! - [`matcher`], [`buffer`], [`marker`]: the stream marker engine that
//!   turns raw upstream text into a clean, terminated reply
//! - [`classify`], [`retry`]: upstream error taxonomy and retry budget

pub mod buffer;
pub mod classify;
pub mod marker;
pub mod matcher;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use buffer::CacheBuffer;
pub use classify::{Classification, ErrorCategory, ErrorClassifier};
pub use marker::{CancelProbe, DEFAULT_BEGIN_THRESHOLD, MarkerEngine};
pub use matcher::{MatchRule, RuleSet};
pub use prompt::{AssembledPrompt, PaddingPolicy, PromptAssembler};
pub use retry::{AttemptState, RetryBudget};
pub use schema::Schema;
