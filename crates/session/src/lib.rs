//! Session credential management.
//!
//! Clients either send their own upstream credential or the literal `auto`,
//! which selects one process-wide shared credential. The shared credential is
//! acquired lazily, at most once at a time, and persisted to the env file so
//! a restart can reuse it.

pub mod manager;

pub use manager::{ResolvedCredential, SessionError, SessionSettings, SessionTokenManager};
