//! Upstream error taxonomy.
//!
//! Upstream failures arrive as free text. Known substrings map to a category,
//! a localized client message, and whether the shared session credential
//! should be dropped. Rows are checked in order and the first match wins.

use serde::Serialize;
use tokenrelay_core::{Locale, MessageKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Throttled,
    Locked,
    RegistrationFailed,
    Network,
    StaleCredential,
    Unverified,
    Unclassified,
}

/// The outcome of classifying one upstream error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    /// Text shown to the client.
    pub message: String,
    /// Drop the shared credential (only honored when the shared one was used).
    pub invalidate: bool,
}

enum Message {
    Fixed(MessageKey),
    /// The upstream text followed by a generic hint.
    Original,
}

struct Row {
    needles: &'static [&'static str],
    category: ErrorCategory,
    message: Message,
    invalidate: bool,
}

const ROWS: &[Row] = &[
    Row {
        needles: &["rate_limit_error"],
        category: ErrorCategory::Throttled,
        message: Message::Fixed(MessageKey::AccountLimited),
        invalidate: true,
    },
    Row {
        needles: &["Account in read-only mode"],
        category: ErrorCategory::Locked,
        message: Message::Fixed(MessageKey::AccountLocked),
        invalidate: true,
    },
    Row {
        needles: &["https://www.linshiyouxiang.net/"],
        category: ErrorCategory::RegistrationFailed,
        message: Message::Fixed(MessageKey::RegistrationFailed),
        invalidate: false,
    },
    Row {
        needles: &["connection refused"],
        category: ErrorCategory::Network,
        message: Message::Fixed(MessageKey::NetworkError),
        invalidate: false,
    },
    Row {
        needles: &[
            "failed to fetch the `organizationId`",
            "failed to fetch the `conversationId`",
        ],
        category: ErrorCategory::StaleCredential,
        message: Message::Original,
        invalidate: true,
    },
    Row {
        needles: &["Account has not completed verification"],
        category: ErrorCategory::Unverified,
        message: Message::Fixed(MessageKey::VerificationRequired),
        invalidate: true,
    },
];

/// Maps upstream error text to a [`Classification`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier {
    locale: Locale,
}

impl ErrorClassifier {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn classify(&self, error: &str) -> Classification {
        let row = ROWS
            .iter()
            .find(|row| row.needles.iter().any(|needle| error.contains(needle)));

        match row {
            Some(row) => Classification {
                category: row.category,
                message: self.render(&row.message, error),
                invalidate: row.invalidate,
            },
            None => Classification {
                category: ErrorCategory::Unclassified,
                message: self.render(&Message::Original, error),
                invalidate: false,
            },
        }
    }

    fn render(&self, message: &Message, error: &str) -> String {
        match message {
            Message::Fixed(key) => self.locale.text(*key).to_string(),
            Message::Original => {
                format!("{error}\n\n{}", self.locale.text(MessageKey::ErrorOther))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn en() -> ErrorClassifier {
        ErrorClassifier::new(Locale::En)
    }

    #[test]
    fn rate_limit_wins_over_everything() {
        let c = en().classify("connection refused; rate_limit_error; Account in read-only mode");
        assert_eq!(c.category, ErrorCategory::Throttled);
        assert!(c.invalidate);
        assert_eq!(c.message, Locale::En.text(MessageKey::AccountLimited));
    }

    #[test]
    fn table_rows() {
        let cases = [
            ("Account in read-only mode", ErrorCategory::Locked, true),
            (
                "register via https://www.linshiyouxiang.net/ failed",
                ErrorCategory::RegistrationFailed,
                false,
            ),
            ("dial tcp: connection refused", ErrorCategory::Network, false),
            ("failed to fetch the `organizationId`", ErrorCategory::StaleCredential, true),
            ("failed to fetch the `conversationId`", ErrorCategory::StaleCredential, true),
            (
                "Account has not completed verification",
                ErrorCategory::Unverified,
                true,
            ),
        ];
        for (text, category, invalidate) in cases {
            let c = en().classify(text);
            assert_eq!(c.category, category, "{text}");
            assert_eq!(c.invalidate, invalidate, "{text}");
        }
    }

    #[test]
    fn stale_credential_keeps_original_text() {
        let c = en().classify("failed to fetch the `organizationId`: 403");
        assert_eq!(
            c.message,
            format!(
                "failed to fetch the `organizationId`: 403\n\n{}",
                Locale::En.text(MessageKey::ErrorOther)
            )
        );
    }

    #[test]
    fn unknown_errors_are_unclassified_and_keep_the_token() {
        let c = ErrorClassifier::default().classify("boom");
        assert_eq!(c.category, ErrorCategory::Unclassified);
        assert!(!c.invalidate);
        assert_eq!(c.message, format!("boom\n\n{}", Locale::Zh.text(MessageKey::ErrorOther)));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let c = en().classify("Connection Refused");
        assert_eq!(c.category, ErrorCategory::Unclassified);
    }
}
