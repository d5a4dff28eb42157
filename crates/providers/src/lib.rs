//! Upstream provider clients for tokenrelay.
//!
//! All clients implement the `tokenrelay_core::Upstream` trait.

pub mod http;

pub use http::HttpUpstream;
