//! Prompt assembly: history merging, trimming, role-label canonicalization,
//! and padding.
//!
//! The upstream provider applies undocumented minimum-context heuristics, so
//! short prompts can be padded with inert filler up to a configured size. With
//! a fixed filler the padded prompt is deterministic.

use crate::schema::{self, Schema};
use rand::seq::IndexedRandom;
use regex_lite::Regex;
use std::sync::LazyLock;
use tokenrelay_core::{HistoryMessage, ModelFamily, RequestError, Role};
use tracing::debug;

static APOLOGY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"I apologize[^\n]+").expect("apology pattern is valid"));

static MARKUP_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"</?[A-Za-z][A-Za-z0-9_.:-]*(?:\s+[^<>]*?)?/?>"#).expect("markup pattern is valid")
});

const TRAILING_ASSISTANT: &str = "\n\nAssistant: ";
const LEADING_HUMAN: &str = "\n\nHuman: ";
const PADDING_SEPARATOR: &str = "\n\n\n";

/// Built-in filler phrases, picked at random when no global filler is set.
pub const FILLERS: &[&str] = &[
    "Claude2.0 is so good.",
    "never lie, cheat or steal. always smile a fair deal.",
    "like tree, like fruit.",
    "East, west, home is best.",
    "原神，启动！",
    "德玛西亚万岁。",
    "薛定谔的寄。",
    "折戟成沙丶丿",
    "提无示效。",
];

/// How short prompts are bulked up.
#[derive(Debug, Clone)]
pub struct PaddingPolicy {
    /// Fixed filler; a random entry of [`FILLERS`] when `None`.
    pub filler: Option<String>,

    /// Target minimum length of the outbound prompt, in bytes.
    pub min_size: usize,
}

impl Default for PaddingPolicy {
    fn default() -> Self {
        Self {
            filler: None,
            min_size: 50_000,
        }
    }
}

impl PaddingPolicy {
    fn filler(&self) -> &str {
        match &self.filler {
            Some(f) => f.as_str(),
            None => FILLERS.choose(&mut rand::rng()).copied().unwrap_or_default(),
        }
    }

    /// Prepend filler until `text` reaches `min_size`. Never truncates.
    pub fn apply(&self, text: String) -> String {
        if text.len() >= self.min_size {
            return text;
        }
        let filler = self.filler();
        if filler.is_empty() {
            return text;
        }

        let body = text.trim();
        let missing = self
            .min_size
            .saturating_sub(body.len() + PADDING_SEPARATOR.len());
        let count = missing.div_ceil(filler.len()).max(1);

        let mut padded =
            String::with_capacity(filler.len() * count + PADDING_SEPARATOR.len() + body.len());
        for _ in 0..count {
            padded.push_str(filler);
        }
        padded.push_str(PADDING_SEPARATOR);
        padded.push_str(body);
        padded
    }
}

/// The outbound prompt plus the directives that were embedded in it.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub text: String,
    pub schema: Schema,
}

/// Builds outbound prompts.
#[derive(Debug, Clone, Default)]
pub struct PromptAssembler {
    padding: PaddingPolicy,
}

impl PromptAssembler {
    pub fn new(padding: PaddingPolicy) -> Self {
        Self { padding }
    }

    /// Merge history, extract the directive block, and shape the result.
    ///
    /// The directive block is looked up in the merged transcript, so a block
    /// sent in the latest history message is honored.
    pub fn prepare(
        &self,
        prompt: &str,
        history: &[HistoryMessage],
        family: ModelFamily,
    ) -> Result<AssembledPrompt, RequestError> {
        let transcript = merge_history(prompt, history);
        let (clean, schema) = schema::parse(&transcript)?;
        let text = self.shape(clean, &schema, family);
        debug!(len = text.len(), ?schema, "Prompt assembled");
        Ok(AssembledPrompt { text, schema })
    }

    /// Build the outbound text from a prompt whose directives are already known.
    pub fn assemble(
        &self,
        prompt: &str,
        history: &[HistoryMessage],
        schema: &Schema,
        family: ModelFamily,
    ) -> String {
        self.shape(merge_history(prompt, history), schema, family)
    }

    fn shape(&self, text: String, schema: &Schema, family: ModelFamily) -> String {
        let mut result = APOLOGY.replace_all(&text, "").into_owned();

        if schema.trim_trailing_assistant {
            if let Some(stripped) = result.strip_suffix(TRAILING_ASSISTANT) {
                result = stripped.to_string();
            }
        }
        if schema.trim_leading_human {
            if let Some(stripped) = result.strip_prefix(LEADING_HUMAN) {
                result = stripped.to_string();
            }
        }

        result = result.replace("A:", "\nAssistant:").replace("H:", "\nHuman:");

        if schema.full_width_colon {
            result = result
                .replace("Assistant:", "Assistant：")
                .replace("Human:", "Human：");
        }

        if schema.strip_markup {
            result = MARKUP_TAG.replace_all(&result, "").into_owned();
        }

        if schema.padding && family.allows_padding() {
            result = self.padding.apply(result);
        }

        result
    }
}

/// Fold prior turns into the prompt as role-labelled paragraphs.
pub fn merge_history(prompt: &str, history: &[HistoryMessage]) -> String {
    let mut result = prompt.to_string();
    for message in history {
        match message.role {
            Role::Assistant => {
                result.push_str("Assistant: ");
                result.push_str(message.content.trim());
            }
            Role::User => {
                let content = message.content.trim();
                if content.is_empty() {
                    continue;
                }
                match content.strip_prefix("System:") {
                    Some(system) => result.push_str(system.trim()),
                    None => {
                        result.push_str("Human: ");
                        result.push_str(&message.content);
                    }
                }
            }
            Role::System | Role::Other => result.push_str(message.content.trim()),
        }
        result.push_str("\n\n");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_padding() -> Schema {
        Schema {
            padding: false,
            full_width_colon: false,
            ..Schema::default()
        }
    }

    fn fixed(filler: &str, min_size: usize) -> PromptAssembler {
        PromptAssembler::new(PaddingPolicy {
            filler: Some(filler.into()),
            min_size,
        })
    }

    #[test]
    fn history_is_rendered_in_order() {
        let history = vec![
            HistoryMessage::user("hello"),
            HistoryMessage::assistant("  hi there  "),
            HistoryMessage::user("System: be brief"),
            HistoryMessage::user("   "),
            HistoryMessage::system("rules"),
        ];
        let merged = merge_history("", &history);
        assert_eq!(
            merged,
            "Human: hello\n\nAssistant: hi there\n\nbe brief\n\nrules\n\n"
        );
    }

    #[test]
    fn trims_markers_and_canonicalizes() {
        let asm = PromptAssembler::default();
        let out = asm.assemble("\n\nHuman: H: x A: y\n\nAssistant: ", &[], &no_padding(), ModelFamily::Web);
        assert_eq!(out, "\nHuman: x \nAssistant: y");
    }

    #[test]
    fn trims_can_be_disabled() {
        let asm = PromptAssembler::default();
        let schema = Schema {
            trim_leading_human: false,
            trim_trailing_assistant: false,
            ..no_padding()
        };
        let raw = "\n\nHuman: q\n\nAssistant: ";
        assert_eq!(asm.assemble(raw, &[], &schema, ModelFamily::Web), raw);
    }

    #[test]
    fn apology_is_stripped_regardless_of_schema() {
        let asm = PromptAssembler::default();
        let out = asm.assemble(
            "before\nI apologize, but I cannot do that.\nafter",
            &[],
            &no_padding(),
            ModelFamily::Web,
        );
        assert_eq!(out, "before\n\nafter");
    }

    #[test]
    fn full_width_colon_only_touches_role_labels() {
        let asm = PromptAssembler::default();
        let schema = Schema {
            full_width_colon: true,
            ..no_padding()
        };
        let out = asm.assemble("Human: a ratio 1:2 A: b", &[], &schema, ModelFamily::Web);
        assert_eq!(out, "Human： a ratio 1:2 \nAssistant： b");
    }

    #[test]
    fn markup_stripping_keeps_inner_text() {
        let asm = PromptAssembler::default();
        let schema = Schema {
            strip_markup: true,
            ..no_padding()
        };
        let out = asm.assemble(
            "<slot name=\"x\">keep</slot> and <br/> 1 < 2",
            &[],
            &schema,
            ModelFamily::Web,
        );
        assert_eq!(out, "keep and  1 < 2");
    }

    #[test]
    fn padding_reaches_minimum_and_is_deterministic() {
        let asm = fixed("like tree, like fruit.", 500);
        let schema = Schema {
            full_width_colon: false,
            ..Schema::default()
        };
        let a = asm.assemble("  Human: question  ", &[], &schema, ModelFamily::Web);
        let b = asm.assemble("  Human: question  ", &[], &schema, ModelFamily::Web);
        assert_eq!(a, b);
        assert!(a.len() >= 500);
        assert!(a.starts_with("like tree, like fruit.like tree"));
        assert!(a.ends_with("\n\n\nHuman: question"));
        assert!(a.len() < 500 + "like tree, like fruit.".len());
    }

    #[test]
    fn padding_never_truncates_long_prompts() {
        let asm = fixed("x", 10);
        let long = "y".repeat(40);
        assert_eq!(asm.assemble(&long, &[], &Schema::default(), ModelFamily::Web), long);
    }

    #[test]
    fn padding_minimum_holds_across_sizes() {
        for min_size in [0, 1, 5, 17, 64, 333, 1000] {
            let policy = PaddingPolicy {
                filler: Some("abc".into()),
                min_size,
            };
            for body in ["", "q", "  spaced out  ", "a much longer body of text"] {
                let out = policy.apply(body.to_string());
                assert!(out.len() >= min_size, "min={min_size} body={body:?} out={out:?}");
            }
        }
    }

    #[test]
    fn configured_filler_is_used_as_is() {
        let policy = PaddingPolicy {
            filler: Some("xyz ".into()),
            min_size: 0,
        };
        assert_eq!(policy.filler(), "xyz ");
    }

    #[test]
    fn random_filler_comes_from_builtin_set() {
        let policy = PaddingPolicy {
            filler: None,
            min_size: 200,
        };
        let out = policy.apply("body".into());
        assert!(out.len() >= 200);
        assert!(FILLERS.iter().any(|f| out.starts_with(f)));
    }

    #[test]
    fn slack_family_is_never_padded() {
        let asm = fixed("filler", 1000);
        let out = asm.assemble("short", &[], &Schema::default(), ModelFamily::Slack);
        assert_eq!(out, "short");
    }

    #[test]
    fn prepare_reads_schema_from_history() {
        let asm = fixed("f", 10_000);
        let history = vec![HistoryMessage::user("schema {\"pile\": false} hi")];
        let assembled = asm.prepare("", &history, ModelFamily::Web).unwrap();
        assert!(!assembled.schema.padding);
        assert!(!assembled.text.contains("schema"));
        assert!(assembled.text.len() < 100);
    }

    #[test]
    fn prepare_propagates_bad_schema() {
        let asm = PromptAssembler::default();
        let err = asm
            .prepare("schema {\"pile\": 3}", &[], ModelFamily::Web)
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidSchema(_)));
    }
}
