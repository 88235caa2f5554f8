//! Utterance-to-phrase scoring
//!
//! Exact, substring and token-overlap checks always run. The fuzzy step is
//! optional and fixed when the scorer is built.

use std::collections::HashSet;
use tracing::warn;

use crate::catalog::Phrase;
use crate::fuzzy::{FuzzyScorer, FuzzyStrategy};

pub const EXACT_BONUS: f64 = 20.0;
pub const SUBSTRING_BONUS: f64 = 10.0;
/// Per shared token, when at least two tokens overlap
pub const TOKEN_BONUS: f64 = 3.0;
pub const SINGLE_TOKEN_BONUS: f64 = 1.0;
/// Whole-string similarity (0-100) needed before the fuzzy step scores
pub const FUZZY_MIN_SIMILARITY: u8 = 85;
const FUZZY_DIVISOR: f64 = 20.0;

/// A transcript after validation, split into tokens
#[derive(Debug, Clone)]
pub struct Utterance {
    raw: String,
    text: String,
    tokens: HashSet<String>,
}

impl Utterance {
    pub fn new(raw: impl Into<String>, sanitized: impl Into<String>) -> Self {
        let text = sanitized.into();
        let tokens = text.split_whitespace().map(str::to_string).collect();
        Self {
            raw: raw.into(),
            text,
            tokens,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn has_token(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

pub struct MatchScorer {
    fuzzy: Option<Box<dyn FuzzyScorer>>,
}

impl MatchScorer {
    pub fn new(fuzzy: Option<Box<dyn FuzzyScorer>>) -> Self {
        Self { fuzzy }
    }

    /// Exact, substring and token overlap only
    pub fn exact_only() -> Self {
        Self { fuzzy: None }
    }

    /// Build from config. A strategy missing from this build logs a warning
    /// and falls back to exact-only scoring.
    pub fn from_strategy(strategy: FuzzyStrategy) -> Self {
        match strategy.build() {
            Ok(fuzzy) => Self { fuzzy },
            Err(e) => {
                warn!(error = %e, "fuzzy matching disabled");
                Self::exact_only()
            }
        }
    }

    pub fn fuzzy_name(&self) -> Option<&'static str> {
        self.fuzzy.as_ref().map(|f| f.name())
    }

    /// Score in `[0, weight + 20]`
    pub fn score(&self, utterance: &Utterance, phrase: &Phrase, weight: u32) -> f64 {
        let weight = f64::from(weight);
        let max = weight + EXACT_BONUS;

        if utterance.text == phrase.as_str() {
            return max;
        }
        if utterance.text.contains(phrase.as_str()) {
            return weight + SUBSTRING_BONUS;
        }

        let shared = phrase.shared_tokens(utterance);
        if shared >= 2 {
            return (weight + TOKEN_BONUS * shared as f64).min(max);
        }
        if shared == 1 && phrase.token_count() <= 2 {
            return weight + SINGLE_TOKEN_BONUS;
        }

        if let Some(fuzzy) = &self.fuzzy {
            let similarity = fuzzy.similarity(&utterance.text, phrase.as_str());
            if similarity >= FUZZY_MIN_SIMILARITY {
                return weight + f64::from(similarity) / FUZZY_DIVISOR;
            }
        }
        0.0
    }

    /// Convenience for one-off scoring of plain strings
    pub fn score_text(&self, utterance: &str, phrase: &str, weight: u32) -> f64 {
        self.score(&Utterance::new(utterance, utterance), &Phrase::new(phrase), weight)
    }
}

impl std::fmt::Debug for MatchScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchScorer")
            .field("fuzzy", &self.fuzzy_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        let scorer = MatchScorer::exact_only();
        assert_eq!(scorer.score_text("next slide", "next slide", 10), 30.0);
    }

    #[test]
    fn test_substring() {
        let scorer = MatchScorer::exact_only();
        assert_eq!(scorer.score_text("please next slide now", "next slide", 10), 20.0);
    }

    #[test]
    fn test_token_overlap() {
        let scorer = MatchScorer::exact_only();
        // "slide" and "show" shared
        assert_eq!(scorer.score_text("close slide show", "open slide show", 18), 24.0);
        // one shared token on a short phrase
        assert_eq!(scorer.score_text("help me", "help menu", 8), 9.0);
        // one shared token on a long phrase
        assert_eq!(scorer.score_text("help", "help me menu", 8), 0.0);
    }

    #[test]
    fn test_token_overlap_capped() {
        let scorer = MatchScorer::exact_only();
        // 7 shared tokens would give 1 + 21
        let phrase = "a1 b2 c3 d4 e5 f6 g7";
        let utterance = "g7 f6 e5 d4 c3 b2 a1";
        assert_eq!(scorer.score_text(utterance, phrase, 1), 21.0);
    }

    #[test]
    fn test_no_overlap() {
        let scorer = MatchScorer::exact_only();
        assert_eq!(scorer.score_text("hello world", "next slide", 10), 0.0);
    }

    #[cfg(feature = "fuzzy")]
    #[test]
    fn test_fuzzy_fallback() {
        let scorer = MatchScorer::from_strategy(FuzzyStrategy::Ratio);
        assert_eq!(scorer.fuzzy_name(), Some("ratio"));
        // ratio 95: 10 + 95 / 20
        assert_eq!(scorer.score_text("nextslide", "next slide", 10), 14.75);
        // below 85 gives nothing
        assert_eq!(scorer.score_text("stap", "stop", 10), 0.0);
    }

    #[test]
    fn test_fuzzy_none() {
        let scorer = MatchScorer::from_strategy(FuzzyStrategy::None);
        assert_eq!(scorer.fuzzy_name(), None);
        assert_eq!(scorer.score_text("nextslide", "next slide", 10), 0.0);
    }
}
