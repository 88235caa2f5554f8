//! Self-tuning acceptance threshold
//!
//! Tracks the last few accepted and rejected scores and moves the threshold
//! within a fixed band: more tolerant when recognition keeps failing,
//! stricter when accepted matches are consistently strong. Also remembers
//! how often each rejected utterance was attempted, which is what drives
//! pronunciation learning.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// Success and failure windows hold at most this many scores
pub const WINDOW: usize = 10;
pub const MIN_THRESHOLD: f64 = 3.0;
pub const MAX_THRESHOLD: f64 = 8.0;

const ADJUST_STEP: f64 = 0.5;
const HIGH_FAILURE_RATE: f64 = 0.5;
const STRICT_AVERAGE: f64 = 12.0;
/// Average assumed before any success is recorded
const NEUTRAL_AVERAGE: f64 = 10.0;
/// Commands accepted more often than this get extra leniency
const FREQUENT_COMMAND: u32 = 10;

/// How the detector picks its acceptance threshold
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcceptanceMode {
    /// Tracker-adjusted threshold, per command
    #[default]
    Adaptive,
    /// Constant threshold from config; history is still tracked
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdReason {
    Normal,
    /// Failure rate above half the window
    Tolerant,
}

impl fmt::Display for ThresholdReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdReason::Normal => f.write_str("normal operation"),
            ThresholdReason::Tolerant => f.write_str("high failure rate, tolerance mode"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PronunciationAttempt {
    pub attempts: u32,
    pub best_score: f64,
    pub last_seen: DateTime<Local>,
}

/// An utterance that was attempted often enough to become a phrase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnedPronunciation {
    pub utterance: String,
    pub command: String,
    pub attempts: u32,
    pub best_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdStatistics {
    pub current_threshold: f64,
    pub base_threshold: f64,
    pub recent_failures: usize,
    pub recent_successes: usize,
    pub commands_learned: usize,
    pub pronunciations_learned: usize,
    pub average_success_score: f64,
}

/// Knobs for [`AdaptiveThresholdTracker`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSettings {
    pub base: f64,
    pub confirm_low: f64,
    pub confirm_high: f64,
    pub learn_min_attempts: u32,
    pub learn_min_score: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            base: 6.0,
            confirm_low: 8.0,
            confirm_high: 12.0,
            learn_min_attempts: 3,
            learn_min_score: 5.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveThresholdTracker {
    settings: TrackerSettings,
    current: f64,
    successes: VecDeque<f64>,
    failures: VecDeque<f64>,
    frequency: HashMap<String, u32>,
    pronunciations: HashMap<String, PronunciationAttempt>,
}

impl Default for AdaptiveThresholdTracker {
    fn default() -> Self {
        Self::new(TrackerSettings::default())
    }
}

fn push_window(window: &mut VecDeque<f64>, score: f64) {
    if window.len() == WINDOW {
        window.pop_front();
    }
    window.push_back(score);
}

/// Key used for pronunciation attempts
fn attempt_key(utterance: &str) -> String {
    utterance.trim().to_lowercase()
}

impl AdaptiveThresholdTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            current: settings.base.clamp(MIN_THRESHOLD, MAX_THRESHOLD),
            settings,
            successes: VecDeque::with_capacity(WINDOW),
            failures: VecDeque::with_capacity(WINDOW),
            frequency: HashMap::new(),
            pronunciations: HashMap::new(),
        }
    }

    pub fn base_threshold(&self) -> f64 {
        self.settings.base
    }

    /// Threshold as of the last adjustment
    pub fn current_threshold(&self) -> f64 {
        self.current
    }

    fn average_success(&self) -> f64 {
        if self.successes.is_empty() {
            NEUTRAL_AVERAGE
        } else {
            self.successes.iter().sum::<f64>() / self.successes.len() as f64
        }
    }

    /// Recompute the global threshold from the recent windows
    pub fn adjust(&mut self) -> (f64, ThresholdReason) {
        let failure_rate = self.failures.len() as f64 / WINDOW as f64;
        let mut adjustment = 0.0;
        let mut reason = ThresholdReason::Normal;

        if failure_rate > HIGH_FAILURE_RATE {
            adjustment -= ADJUST_STEP;
            reason = ThresholdReason::Tolerant;
        }
        if self.average_success() > STRICT_AVERAGE {
            adjustment += ADJUST_STEP;
        }

        self.current = (self.settings.base + adjustment).clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        (self.current, reason)
    }

    /// Adjusted threshold, with extra leniency for frequently used commands
    pub fn adaptive_threshold(&mut self, command: Option<&str>) -> f64 {
        let (threshold, _) = self.adjust();
        let frequent = command
            .and_then(|c| self.frequency.get(c))
            .is_some_and(|&count| count > FREQUENT_COMMAND);
        if frequent {
            (threshold - ADJUST_STEP).max(MIN_THRESHOLD)
        } else {
            threshold
        }
    }

    pub fn should_ask_confirmation(&self, score: f64) -> bool {
        self.settings.confirm_low <= score && score < self.settings.confirm_high
    }

    pub fn record_success(&mut self, command: &str, score: f64) {
        push_window(&mut self.successes, score);
        *self.frequency.entry(command.to_string()).or_insert(0) += 1;
    }

    pub fn record_failure(&mut self, utterance: &str, score: f64) {
        push_window(&mut self.failures, score);

        let now = Local::now();
        let attempt = self
            .pronunciations
            .entry(attempt_key(utterance))
            .or_insert(PronunciationAttempt {
                attempts: 0,
                best_score: 0.0,
                last_seen: now,
            });
        attempt.attempts += 1;
        attempt.best_score = attempt.best_score.max(score);
        attempt.last_seen = now;
    }

    pub fn attempts(&self, utterance: &str) -> Option<&PronunciationAttempt> {
        self.pronunciations.get(&attempt_key(utterance))
    }

    /// Returns a record once `utterance` has been tried often enough and came
    /// close enough to be worth promoting into `command`'s phrases
    pub fn learn_common_pronunciation(&self, utterance: &str, command: &str) -> Option<LearnedPronunciation> {
        let key = attempt_key(utterance);
        let attempt = self.pronunciations.get(&key)?;
        let eligible = attempt.attempts >= self.settings.learn_min_attempts
            && attempt.best_score >= self.settings.learn_min_score;
        eligible.then(|| LearnedPronunciation {
            utterance: key,
            command: command.to_string(),
            attempts: attempt.attempts,
            best_score: attempt.best_score,
        })
    }

    pub fn statistics(&self) -> ThresholdStatistics {
        let average = if self.successes.is_empty() {
            0.0
        } else {
            self.average_success()
        };
        ThresholdStatistics {
            current_threshold: self.current,
            base_threshold: self.settings.base,
            recent_failures: self.failures.len(),
            recent_successes: self.successes.len(),
            commands_learned: self.frequency.len(),
            pronunciations_learned: self.pronunciations.len(),
            average_success_score: (average * 100.0).round() / 100.0,
        }
    }

    /// One-line explanation of an accept/reject decision for logs
    pub fn explain(&self, command: &str, score: f64, threshold: f64, accepted: bool) -> String {
        if accepted {
            let mut out = format!("accepted '{command}': score {score:.1} >= threshold {threshold:.1}");
            if self.should_ask_confirmation(score) {
                out.push_str(" (borderline, confirmation suggested)");
            }
            out
        } else {
            format!(
                "rejected '{command}': score {score:.1} < threshold {threshold:.1}, gap {:.1}",
                threshold - score
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_base() {
        let mut tracker = AdaptiveThresholdTracker::default();
        assert_eq!(tracker.current_threshold(), 6.0);
        assert_eq!(tracker.adjust(), (6.0, ThresholdReason::Normal));
    }

    #[test]
    fn test_failures_lower_threshold() {
        let mut tracker = AdaptiveThresholdTracker::default();
        for i in 0..5 {
            tracker.record_failure(&format!("noise {i}"), 2.0);
        }
        // exactly half is not "high"
        assert_eq!(tracker.adjust().0, 6.0);
        tracker.record_failure("noise 5", 2.0);
        assert_eq!(tracker.adjust(), (5.5, ThresholdReason::Tolerant));
    }

    #[test]
    fn test_strong_successes_raise_threshold() {
        let mut tracker = AdaptiveThresholdTracker::default();
        for _ in 0..3 {
            tracker.record_success("next", 30.0);
        }
        assert_eq!(tracker.adjust().0, 6.5);
    }

    #[test]
    fn test_windows_bounded() {
        let mut tracker = AdaptiveThresholdTracker::default();
        for i in 0..25 {
            tracker.record_failure(&format!("u{i}"), 1.0);
            tracker.record_success("next", 5.0);
        }
        let stats = tracker.statistics();
        assert_eq!(stats.recent_failures, WINDOW);
        assert_eq!(stats.recent_successes, WINDOW);
        assert_eq!(stats.average_success_score, 5.0);
    }

    #[test]
    fn test_threshold_clamped() {
        let low = TrackerSettings {
            base: 3.0,
            ..TrackerSettings::default()
        };
        let mut tracker = AdaptiveThresholdTracker::new(low);
        for i in 0..10 {
            tracker.record_failure(&format!("u{i}"), 1.0);
        }
        assert_eq!(tracker.adjust().0, MIN_THRESHOLD);

        let high = TrackerSettings {
            base: 8.0,
            ..TrackerSettings::default()
        };
        let mut tracker = AdaptiveThresholdTracker::new(high);
        tracker.record_success("next", 30.0);
        assert_eq!(tracker.adjust().0, MAX_THRESHOLD);
    }

    #[test]
    fn test_frequent_command_leniency() {
        let mut tracker = AdaptiveThresholdTracker::default();
        for _ in 0..11 {
            tracker.record_success("next", 10.0);
        }
        assert_eq!(tracker.adaptive_threshold(Some("next")), 5.5);
        assert_eq!(tracker.adaptive_threshold(Some("stop")), 6.0);
        assert_eq!(tracker.adaptive_threshold(None), 6.0);
    }

    #[test]
    fn test_confirmation_band() {
        let tracker = AdaptiveThresholdTracker::default();
        assert!(!tracker.should_ask_confirmation(7.9));
        assert!(tracker.should_ask_confirmation(8.0));
        assert!(tracker.should_ask_confirmation(11.9));
        assert!(!tracker.should_ask_confirmation(12.0));
    }

    #[test]
    fn test_learning_eligibility() {
        let mut tracker = AdaptiveThresholdTracker::default();
        tracker.record_failure("  Neks Lide ", 4.0);
        tracker.record_failure("neks lide", 5.0);
        assert!(tracker.learn_common_pronunciation("neks lide", "next").is_none());

        tracker.record_failure("NEKS LIDE", 3.0);
        let learned = tracker.learn_common_pronunciation("neks lide", "next").unwrap();
        assert_eq!(learned.utterance, "neks lide");
        assert_eq!(learned.attempts, 3);
        assert_eq!(learned.best_score, 5.0);

        // attempts alone are not enough
        for _ in 0..5 {
            tracker.record_failure("mumble", 2.0);
        }
        assert!(tracker.learn_common_pronunciation("mumble", "next").is_none());
        assert!(tracker.learn_common_pronunciation("never said", "next").is_none());
    }

    #[test]
    fn test_explain() {
        let tracker = AdaptiveThresholdTracker::default();
        let text = tracker.explain("next", 9.0, 6.0, true);
        assert!(text.contains("accepted 'next'"));
        assert!(text.contains("confirmation"));
        let text = tracker.explain("next", 4.0, 6.0, false);
        assert!(text.contains("gap 2.0"));
    }
}
