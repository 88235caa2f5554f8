//! Transcript validation and sanitizing
//!
//! Transcripts come from an untrusted recognizer and may end up in logs and
//! in the unrecognized-input file, so anything that looks like a shell or
//! path payload is refused before scoring.

use regex::RegexSet;
use serde::Serialize;
use std::sync::LazyLock;
use thiserror::Error;

pub const MIN_LENGTH: usize = 2;
pub const MAX_LENGTH: usize = 200;

const INJECTION_KEYWORDS: &[&str] = &[
    "exec",
    "eval",
    "system",
    "import",
    "subprocess",
    "os.system",
    "shell",
    "cmd",
    "powershell",
    "bash",
];

static DANGEROUS_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([r"[;&|`$(){}]", r"\.\.[\\/]", r"<|>", r"--"])
        .expect("dangerous input patterns are valid regexes")
});

/// Characters kept by [`sanitize`] besides letters, digits and whitespace
const SAFE_PUNCTUATION: &str = "_-.,!?";

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("input is empty")]
    Empty,

    #[error("input contains blocked keyword '{keyword}'")]
    Injection { keyword: String },

    /// Shell metacharacters, path traversal, redirects or option dashes
    #[error("input contains a dangerous pattern")]
    DangerousPattern,

    #[error("input too short ({len} characters)")]
    TooShort { len: usize },

    #[error("input too long ({len} characters, max {max})", max = MAX_LENGTH)]
    TooLong { len: usize },
}

/// Lowercase, drop characters outside the safe set, collapse whitespace
///
/// Dropping runs before collapsing so a removed character between two words
/// (`"next # slide"`) never leaves a double space behind.
pub fn sanitize(text: &str) -> String {
    let kept: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || SAFE_PUNCTUATION.contains(*c))
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn injection_keyword(&self, text: &str) -> Option<&'static str> {
        let lower = text.to_lowercase();
        INJECTION_KEYWORDS.iter().copied().find(|k| lower.contains(k))
    }

    pub fn is_dangerous(&self, text: &str) -> bool {
        DANGEROUS_PATTERNS.is_match(text)
    }

    /// Returns the sanitized transcript, or why it was refused
    pub fn validate(&self, text: &str) -> Result<String, ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::Empty);
        }
        if let Some(keyword) = self.injection_keyword(text) {
            return Err(ValidationError::Injection {
                keyword: keyword.to_string(),
            });
        }
        if self.is_dangerous(text) {
            return Err(ValidationError::DangerousPattern);
        }

        let clean = sanitize(text);
        let len = clean.chars().count();
        if len < MIN_LENGTH {
            return Err(ValidationError::TooShort { len });
        }
        if len > MAX_LENGTH {
            return Err(ValidationError::TooLong { len });
        }
        Ok(clean)
    }
}
