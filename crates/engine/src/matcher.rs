//! Sentinel markers recognized in the upstream stream.

use tokenrelay_core::TransformOptions;

/// Start-of-reply marker.
pub const ASSISTANT: &str = "A:";
/// Start of a hallucinated user turn.
pub const HUMAN: &str = "H:";
/// Start of a hallucinated system turn.
pub const SYSTEM: &str = "System:";

/// What to do when a sentinel shows up after the reply began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// Remove the marker and keep going.
    Redact(&'static str),
    /// Cut the reply at the marker and stop.
    RedactAndTerminate(&'static str),
}

impl MatchRule {
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Redact(m) | Self::RedactAndTerminate(m) => m,
        }
    }

    pub fn terminates(&self) -> bool {
        matches!(self, Self::RedactAndTerminate(_))
    }
}

/// Active rules for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<MatchRule>,
}

impl RuleSet {
    pub fn for_options(options: &TransformOptions) -> Self {
        let mut rules = vec![MatchRule::Redact(ASSISTANT)];
        if options.terminate_on_human {
            rules.push(MatchRule::RedactAndTerminate(HUMAN));
        }
        if options.terminate_on_system {
            rules.push(MatchRule::RedactAndTerminate(SYSTEM));
        }
        Self { rules }
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    /// Markers that end the reply.
    pub fn terminators(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules
            .iter()
            .filter(|r| r.terminates())
            .map(MatchRule::marker)
    }

    /// Earliest terminator in `text` at or after byte `from`, as
    /// `(absolute offset, marker)`.
    pub fn first_terminator(&self, text: &str, from: usize) -> Option<(usize, &'static str)> {
        let tail = text.get(from..)?;
        self.terminators()
            .filter_map(|marker| tail.find(marker).map(|at| (from + at, marker)))
            .min_by_key(|(at, _)| *at)
    }

    /// Length of the longest suffix of `text` that is a proper prefix of an
    /// active marker. That many bytes must be held back: the next chunk may
    /// complete the marker.
    pub fn partial_suffix_len(&self, text: &str) -> usize {
        self.rules
            .iter()
            .map(|r| partial_overlap(text, r.marker()))
            .max()
            .unwrap_or(0)
    }
}

fn partial_overlap(text: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .find(|&n| text.ends_with(&marker[..n]))
        .unwrap_or(0)
}
