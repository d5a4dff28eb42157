//! Directive block parsing.
//!
//! A prompt may embed a block such as
//!
//! ```text
//! schema {"boS": true, "pile": false}
//! ```
//!
//! which is removed from the prompt and decoded into a [`Schema`]. Keys that
//! are not present keep their defaults; unknown keys are ignored.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tokenrelay_core::{RequestError, StreamMode, TransformOptions};

static SCHEMA_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"schema\s?\{[^}]*\}").expect("schema block pattern is valid"));

/// Behavioral flags controlling prompt shaping and stream transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    /// Strip a leading `"\n\nHuman: "` from the prompt.
    #[serde(rename = "trimP")]
    pub trim_leading_human: bool,

    /// Strip a trailing `"\n\nAssistant: "` from the prompt.
    #[serde(rename = "trimS")]
    pub trim_trailing_assistant: bool,

    /// Stop the reply at a `H:` marker.
    #[serde(rename = "boH")]
    pub truncate_on_human: bool,

    /// Stop the reply at a `System:` marker.
    #[serde(rename = "boS")]
    pub truncate_on_system: bool,

    /// Pad short prompts with filler.
    #[serde(rename = "pile")]
    pub padding: bool,

    #[serde(rename = "debug")]
    pub debug: bool,

    /// Use a full-width colon in the outbound role labels.
    #[serde(rename = "fullColon")]
    pub full_width_colon: bool,

    /// Remove embedded XML-style tags from the outbound prompt.
    #[serde(rename = "trimPlot")]
    pub strip_markup: bool,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            trim_leading_human: true,
            trim_trailing_assistant: true,
            truncate_on_human: true,
            truncate_on_system: false,
            padding: true,
            debug: false,
            full_width_colon: true,
            strip_markup: false,
        }
    }
}

impl Schema {
    /// Marker engine options for a stream in `mode`.
    pub fn transform_options(&self, mode: StreamMode) -> TransformOptions {
        TransformOptions {
            mode,
            terminate_on_human: self.truncate_on_human,
            terminate_on_system: self.truncate_on_system,
            debug: self.debug,
        }
    }
}

/// Extract the directive block from `raw`.
///
/// Returns the prompt with the block removed and the decoded schema, or the
/// prompt unchanged with default flags when there is no block.
pub fn parse(raw: &str) -> Result<(String, Schema), RequestError> {
    let Some(found) = SCHEMA_BLOCK.find(raw) else {
        return Ok((raw.to_string(), Schema::default()));
    };

    let block = found.as_str();
    let body = block["schema".len()..].trim();
    let schema: Schema =
        serde_json::from_str(body).map_err(|e| RequestError::InvalidSchema(e.to_string()))?;

    Ok((raw.replace(block, ""), schema))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_without_block_is_untouched() {
        let raw = "\n\nHuman: hello {not a schema}\n\nAssistant: ";
        let (clean, schema) = parse(raw).unwrap();
        assert_eq!(clean, raw);
        assert_eq!(schema, Schema::default());
    }

    #[test]
    fn block_is_removed_and_only_given_keys_change() {
        let raw = "Human: hi schema {\"boS\": true, \"pile\": false} there";
        let (clean, schema) = parse(raw).unwrap();
        assert_eq!(clean, "Human: hi  there");
        assert!(schema.truncate_on_system);
        assert!(!schema.padding);
        assert!(schema.trim_leading_human);
        assert!(schema.truncate_on_human);
        assert!(schema.full_width_colon);
    }

    #[test]
    fn block_without_space_and_unknown_keys() {
        let (clean, schema) = parse("schema{\"debug\":true,\"colour\":\"red\"}rest").unwrap();
        assert_eq!(clean, "rest");
        assert!(schema.debug);
    }

    #[test]
    fn every_copy_of_the_block_is_removed() {
        let block = "schema {\"trimP\": false}";
        let raw = format!("a {block} b {block} c");
        let (clean, schema) = parse(&raw).unwrap();
        assert_eq!(clean, "a  b  c");
        assert!(!schema.trim_leading_human);
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let err = parse("schema {\"boH\": \"yes\"}").unwrap_err();
        assert!(matches!(err, RequestError::InvalidSchema(_)));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse("schema {boH: true}").is_err());
    }

    #[test]
    fn transform_options_follow_flags() {
        let schema = Schema {
            truncate_on_human: false,
            truncate_on_system: true,
            debug: true,
            ..Schema::default()
        };
        let opts = schema.transform_options(StreamMode::Snapshot);
        assert_eq!(opts.mode, StreamMode::Snapshot);
        assert!(!opts.terminate_on_human);
        assert!(opts.terminate_on_system);
        assert!(opts.debug);
    }
}
