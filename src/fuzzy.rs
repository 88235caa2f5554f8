//! Fuzzy string similarity
//!
//! Whole-string similarity used as the last-resort scoring strategy, plus the
//! sequence alignment ratio shared with phonetic distance. Strategies are
//! picked once when the scorer is built, never probed per call.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Ratcliff/Obershelp similarity in `[0, 1]`.
///
/// Counts characters in the recursively found longest common runs, then
/// returns `2 * matches / (len(a) + len(b))`. Two empty strings are identical.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// Sequence ratio as a whole percentage, rounded half to even
pub fn ratio_percent(a: &str, b: &str) -> u8 {
    (sequence_ratio(a, b) * 100.0).round_ties_even() as u8
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, size) = longest_common_run(a, b);
    if size == 0 {
        return 0;
    }
    size + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + size..], &b[j + size..])
}

/// Longest common contiguous run as `(start_a, start_b, len)`.
/// Ties resolve to the run ending earliest in `a`, then in `b`.
fn longest_common_run(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for i in 0..a.len() {
        for j in 0..b.len() {
            curr[j + 1] = if a[i] == b[j] { prev[j] + 1 } else { 0 };
            let run = curr[j + 1];
            if run > best.2 {
                best = (i + 1 - run, j + 1 - run, run);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    best
}

/// Calculate Levenshtein distance between two strings
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0; b.len() + 1]; a.len() + 1];

    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        dp[0][j] = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
        }
    }
    dp[a.len()][b.len()]
}

/// Whole-string similarity backend for the fuzzy scoring step
pub trait FuzzyScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Similarity between utterance and phrase, 0..=100
    fn similarity(&self, utterance: &str, phrase: &str) -> u8;
}

/// Sequence alignment ratio (Ratcliff/Obershelp)
#[cfg(feature = "fuzzy")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceRatio;

#[cfg(feature = "fuzzy")]
impl FuzzyScorer for SequenceRatio {
    fn name(&self) -> &'static str {
        "ratio"
    }

    fn similarity(&self, utterance: &str, phrase: &str) -> u8 {
        ratio_percent(utterance, phrase)
    }
}

/// Normalized edit distance: `1 - distance / longest`
#[cfg(feature = "fuzzy")]
#[derive(Debug, Clone, Copy, Default)]
pub struct EditDistance;

#[cfg(feature = "fuzzy")]
impl FuzzyScorer for EditDistance {
    fn name(&self) -> &'static str {
        "levenshtein"
    }

    fn similarity(&self, utterance: &str, phrase: &str) -> u8 {
        let longest = utterance.chars().count().max(phrase.chars().count());
        if longest == 0 {
            return 100;
        }
        let distance = levenshtein(utterance, phrase);
        let similar = 1.0 - distance as f64 / longest as f64;
        (similar * 100.0).round_ties_even() as u8
    }
}

/// Fuzzy strategy selected in config
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FuzzyStrategy {
    #[default]
    Ratio,
    Levenshtein,
    None,
}

impl fmt::Display for FuzzyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuzzyStrategy::Ratio => write!(f, "ratio"),
            FuzzyStrategy::Levenshtein => write!(f, "levenshtein"),
            FuzzyStrategy::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("fuzzy strategy '{0}' is not available in this build")]
pub struct FuzzyUnavailable(pub FuzzyStrategy);

impl FuzzyStrategy {
    /// Instantiate the backend. `None` means exact/token scoring only.
    pub fn build(self) -> Result<Option<Box<dyn FuzzyScorer>>, FuzzyUnavailable> {
        match self {
            FuzzyStrategy::None => Ok(None),
            #[cfg(feature = "fuzzy")]
            FuzzyStrategy::Ratio => Ok(Some(Box::new(SequenceRatio))),
            #[cfg(feature = "fuzzy")]
            FuzzyStrategy::Levenshtein => Ok(Some(Box::new(EditDistance))),
            #[cfg(not(feature = "fuzzy"))]
            other => Err(FuzzyUnavailable(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_ratio_identical() {
        assert_eq!(sequence_ratio("next slide", "next slide"), 1.0);
        assert_eq!(sequence_ratio("", ""), 1.0);
    }

    #[test]
    fn test_sequence_ratio_disjoint() {
        assert_eq!(sequence_ratio("abc", "xyz"), 0.0);
        assert_eq!(sequence_ratio("abc", ""), 0.0);
    }

    #[test]
    fn test_sequence_ratio_partial() {
        // "st" + "p" match: 2 * 3 / 8
        assert!((sequence_ratio("stop", "stap") - 0.75).abs() < 1e-9);
        // "abcd" vs "bcde": "bcd" run, 2 * 3 / 8
        assert!((sequence_ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_percent() {
        assert_eq!(ratio_percent("stop", "stap"), 75);
        assert_eq!(ratio_percent("help menu", "help menu"), 100);
        // 2 * 9 / 19 = 94.7
        assert_eq!(ratio_percent("next slide", "next slid"), 95);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("hello", "hello"), 0);
        assert_eq!(levenshtein("hello", "helo"), 1);
        assert_eq!(levenshtein("hello", "world"), 4);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[cfg(feature = "fuzzy")]
    #[test]
    fn test_strategies_build() {
        let ratio = FuzzyStrategy::Ratio.build().unwrap().unwrap();
        assert_eq!(ratio.name(), "ratio");
        assert_eq!(ratio.similarity("stop", "stap"), 75);

        let edit = FuzzyStrategy::Levenshtein.build().unwrap().unwrap();
        assert_eq!(edit.similarity("stop", "stap"), 75);
        assert_eq!(edit.similarity("", ""), 100);

        assert!(FuzzyStrategy::None.build().unwrap().is_none());
    }

    #[cfg(not(feature = "fuzzy"))]
    #[test]
    fn test_strategies_unavailable() {
        assert_eq!(
            FuzzyStrategy::Ratio.build().err(),
            Some(FuzzyUnavailable(FuzzyStrategy::Ratio))
        );
    }
}
