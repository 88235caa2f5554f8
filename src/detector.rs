//! The detect pipeline
//!
//! [`Recognizer`] holds what is shared and read-only per call: the catalog
//! handle and the ranking engine. [`DetectContext`] holds what every call
//! mutates: threshold history, cooldown, stats, and the sink. Callers own
//! the context and pass it in, so there is exactly one writer.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogError, CatalogHandle, CommandCatalog};
use crate::config::Config;
use crate::cooldown::CooldownGate;
use crate::ranking::{MatchCandidate, RankingEngine};
use crate::scorer::{MatchScorer, Utterance};
use crate::sink::{NullSink, UnrecognizedRecord, UnrecognizedSink};
use crate::stats::{DetectionStats, Outcome, Timer};
use crate::threshold::{AcceptanceMode, AdaptiveThresholdTracker, LearnedPronunciation};
use crate::validator::{ValidationError, Validator};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandMatch {
    pub command: String,
    pub phrase: String,
    pub score: f64,
    pub max_score: f64,
    pub description: String,
    pub threshold: f64,
    /// Borderline score; the caller may want to confirm before executing
    pub confirm: bool,
    pub catalog_version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    NoMatch,
    LowConfidence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unrecognized {
    pub reason: UnknownReason,
    /// Closest command id, when something scored at all
    pub closest: Option<String>,
    /// Description of the closest command
    pub suggestion: Option<String>,
    pub raw_input: String,
    pub score: Option<f64>,
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    Cooldown { remaining_ms: u64 },
    Invalid { error: ValidationError },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum Detection {
    Matched(CommandMatch),
    Unknown(Unrecognized),
    Rejected(Rejection),
}

impl Detection {
    /// Accepted command id
    pub fn command(&self) -> Option<&str> {
        match self {
            Detection::Matched(m) => Some(&m.command),
            _ => None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Detection::Matched(_))
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detection::Matched(m) => {
                write!(
                    f,
                    "[OK] {} ({}) score {:.1}/{:.0} via '{}'",
                    m.command, m.description, m.score, m.max_score, m.phrase
                )?;
                if m.confirm {
                    write!(f, " [confirm?]")?;
                }
                Ok(())
            }
            Detection::Unknown(u) => match (u.reason, &u.suggestion) {
                (UnknownReason::LowConfidence, Some(suggestion)) => write!(
                    f,
                    "[??] '{}' not sure, did you mean: {} (score {:.1} < {:.1})",
                    u.raw_input,
                    suggestion,
                    u.score.unwrap_or_default(),
                    u.threshold.unwrap_or_default()
                ),
                _ => write!(f, "[??] '{}' not recognized", u.raw_input),
            },
            Detection::Rejected(Rejection::Cooldown { remaining_ms }) => {
                write!(f, "[--] cooldown, wait {:.1}s", *remaining_ms as f64 / 1000.0)
            }
            Detection::Rejected(Rejection::Invalid { error }) => write!(f, "[!!] rejected: {error}"),
        }
    }
}

/// Mutable per-caller state threaded through every `detect`
pub struct DetectContext {
    tracker: AdaptiveThresholdTracker,
    cooldown: CooldownGate,
    validator: Validator,
    sink: Box<dyn UnrecognizedSink>,
    stats: DetectionStats,
}

impl DetectContext {
    pub fn new(tracker: AdaptiveThresholdTracker, cooldown: Duration) -> Self {
        Self {
            tracker,
            cooldown: CooldownGate::new(cooldown),
            validator: Validator::new(),
            sink: Box::new(NullSink),
            stats: DetectionStats::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            AdaptiveThresholdTracker::new(config.tracker_settings()),
            config.detector.cooldown(),
        )
    }

    pub fn with_sink(mut self, sink: impl UnrecognizedSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn tracker(&self) -> &AdaptiveThresholdTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut AdaptiveThresholdTracker {
        &mut self.tracker
    }

    pub fn stats(&self) -> &DetectionStats {
        &self.stats
    }

    fn forward(&self, record: UnrecognizedRecord) {
        if let Err(e) = self.sink.record(record) {
            warn!(error = %e, "dropped unrecognized record");
        }
    }
}

pub struct Recognizer {
    catalog: CatalogHandle,
    ranking: RankingEngine,
    mode: AcceptanceMode,
    fixed_threshold: f64,
    cooldown: Duration,
}

impl Recognizer {
    /// Adaptive thresholds, no cooldown hint for help text
    pub fn new(catalog: CommandCatalog, ranking: RankingEngine) -> Self {
        Self {
            catalog: CatalogHandle::new(catalog),
            ranking,
            mode: AcceptanceMode::Adaptive,
            fixed_threshold: 8.0,
            cooldown: Duration::ZERO,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, CatalogError> {
        let catalog = CommandCatalog::build(&config.commands, config.detector.region)?;
        let ranking = RankingEngine::new(MatchScorer::from_strategy(config.detector.fuzzy))
            .with_sharding(config.detector.scan_workers, config.detector.shard_min_phrases);
        info!(
            commands = catalog.len(),
            phrases = catalog.phrase_count(),
            region = %catalog.region(),
            fuzzy = ranking.scorer().fuzzy_name().unwrap_or("none"),
            "catalog ready"
        );
        Ok(Self {
            catalog: CatalogHandle::new(catalog),
            ranking,
            mode: config.threshold.mode,
            fixed_threshold: config.threshold.fixed,
            cooldown: config.detector.cooldown(),
        })
    }

    pub fn with_fixed_threshold(mut self, threshold: f64) -> Self {
        self.mode = AcceptanceMode::Fixed;
        self.fixed_threshold = threshold;
        self
    }

    pub fn catalog(&self) -> std::sync::Arc<CommandCatalog> {
        self.catalog.snapshot()
    }

    /// Every positive-score candidate for `text`, best first. Does not touch
    /// any detection state.
    pub fn candidates(&self, text: &str) -> Result<Vec<MatchCandidate>, ValidationError> {
        let sanitized = Validator::new().validate(text)?;
        let utterance = Utterance::new(text, sanitized);
        Ok(self.ranking.candidates(&self.catalog.snapshot(), &utterance))
    }

    pub fn detect(&self, ctx: &mut DetectContext, text: &str) -> Detection {
        self.detect_at(ctx, text, Instant::now())
    }

    /// `detect` with an explicit clock, for callers that timestamp input
    #[hotpath::measure]
    pub fn detect_at(&self, ctx: &mut DetectContext, text: &str, now: Instant) -> Detection {
        if let Some(remaining) = ctx.cooldown.remaining(now) {
            debug!(remaining_ms = remaining.as_millis() as u64, "cooldown active");
            ctx.stats.count(Outcome::Cooldown);
            return Detection::Rejected(Rejection::Cooldown {
                remaining_ms: remaining.as_millis() as u64,
            });
        }

        let sanitized = match ctx.validator.validate(text) {
            Ok(sanitized) => sanitized,
            Err(error) => {
                warn!(%error, "input rejected");
                ctx.stats.count(Outcome::Invalid);
                return Detection::Rejected(Rejection::Invalid { error });
            }
        };
        let utterance = Utterance::new(text, sanitized);

        let catalog = self.catalog.snapshot();
        let timer = Timer::new(catalog.phrase_count());
        let best = self.ranking.best(&catalog, &utterance);
        timer.finish(&mut ctx.stats);

        let Some(best) = best else {
            debug!(input = utterance.text(), "no candidate");
            ctx.stats.count(Outcome::NoMatch);
            ctx.forward(UnrecognizedRecord::new(utterance.text(), None, 0.0, None));
            return Detection::Unknown(Unrecognized {
                reason: UnknownReason::NoMatch,
                closest: None,
                suggestion: None,
                raw_input: utterance.raw().to_string(),
                score: None,
                threshold: None,
            });
        };

        let threshold = match self.mode {
            AcceptanceMode::Adaptive => ctx.tracker.adaptive_threshold(Some(best.command.as_str())),
            AcceptanceMode::Fixed => self.fixed_threshold,
        };
        let accepted = best.score >= threshold;
        debug!(
            "{}",
            ctx.tracker.explain(&best.command, best.score, threshold, accepted)
        );

        if accepted {
            ctx.cooldown.mark_accepted(now);
            ctx.tracker.record_success(&best.command, best.score);
            ctx.stats.count(Outcome::Matched);
            Detection::Matched(CommandMatch {
                confirm: ctx.tracker.should_ask_confirmation(best.score),
                command: best.command,
                phrase: best.phrase,
                score: best.score,
                max_score: best.max_score,
                description: best.description,
                threshold,
                catalog_version: catalog.version(),
            })
        } else {
            ctx.tracker.record_failure(utterance.text(), best.score);
            ctx.stats.count(Outcome::LowConfidence);
            ctx.forward(UnrecognizedRecord::new(
                utterance.text(),
                Some(best.command.as_str()),
                best.score,
                Some(best.description.as_str()),
            ));
            Detection::Unknown(Unrecognized {
                reason: UnknownReason::LowConfidence,
                closest: Some(best.command),
                suggestion: Some(best.description),
                raw_input: utterance.raw().to_string(),
                score: Some(best.score),
                threshold: Some(threshold),
            })
        }
    }

    /// Promote `utterance` into `command`'s phrases once the tracker reports
    /// it as a common pronunciation. Returns the new catalog version, or
    /// `None` when it is not eligible yet or already known.
    pub fn learn_pronunciation(
        &self,
        ctx: &DetectContext,
        utterance: &str,
        command: &str,
    ) -> Result<Option<LearnedPronunciation>, CatalogError> {
        // attempts are keyed by the sanitized text detect saw
        let phrase = ctx
            .validator
            .validate(utterance)
            .map_err(|e| CatalogError::InvalidPhrase {
                phrase: utterance.to_string(),
                reason: e.to_string(),
            })?;
        let Some(learned) = ctx.tracker.learn_common_pronunciation(&phrase, command) else {
            return Ok(None);
        };

        let version = self
            .catalog
            .update(|current| current.with_learned_phrase(command, &phrase))?;
        match version {
            Some(version) => {
                info!(
                    phrase = %phrase,
                    command,
                    attempts = learned.attempts,
                    version,
                    "learned pronunciation"
                );
                Ok(Some(learned))
            }
            None => Ok(None),
        }
    }

    /// Commands with their seeded phrases
    pub fn help_text(&self) -> String {
        let catalog = self.catalog.snapshot();
        let mut out = String::from("Voice commands:\n");
        for command in catalog.commands() {
            out.push_str(&format!("\n  {} - {}\n", command.id(), command.description()));
            let shown: Vec<&str> = command.seeds().iter().take(4).map(String::as_str).collect();
            out.push_str(&format!("    say: {}", shown.join(", ")));
            let more = command.seeds().len().saturating_sub(shown.len());
            if more > 0 {
                out.push_str(&format!(" (+{more} more)"));
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "\n{} phrases across {} commands (catalog v{})\n",
            catalog.phrase_count(),
            catalog.len(),
            catalog.version()
        ));
        if !self.cooldown.is_zero() {
            out.push_str(&format!(
                "Commands are ignored for {:.1}s after each accepted command.\n",
                self.cooldown.as_secs_f64()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CommandSpec;
    use crate::sink::MemorySink;
    use crate::variants::Region;

    fn recognizer() -> Recognizer {
        let specs = vec![
            CommandSpec::new("next", "Next slide", 10, &["next slide"]),
            CommandSpec::new("help", "Show help", 1, &["help menu"]),
        ];
        let catalog = CommandCatalog::build(&specs, Region::Mixed).unwrap();
        Recognizer::new(catalog, RankingEngine::new(MatchScorer::exact_only()))
    }

    fn context() -> DetectContext {
        DetectContext::new(AdaptiveThresholdTracker::default(), Duration::from_secs(2))
    }

    #[test]
    fn test_exact_match() {
        let recognizer = recognizer();
        let mut ctx = context();
        let Detection::Matched(m) = recognizer.detect(&mut ctx, "Next Slide") else {
            panic!("expected match");
        };
        assert_eq!(m.command, "next");
        assert_eq!(m.score, 30.0);
        assert_eq!(m.max_score, 30.0);
        assert!(!m.confirm);
        assert_eq!(m.catalog_version, 1);
        assert_eq!(ctx.tracker().statistics().recent_successes, 1);
    }

    #[test]
    fn test_low_confidence_recorded() {
        let recognizer = recognizer();
        let sink = MemorySink::new();
        let mut ctx = context().with_sink(sink.clone());

        let detection = recognizer.detect(&mut ctx, "help me");
        let Detection::Unknown(u) = detection else {
            panic!("expected unknown");
        };
        assert_eq!(u.reason, UnknownReason::LowConfidence);
        assert_eq!(u.closest.as_deref(), Some("help"));
        assert_eq!(u.suggestion.as_deref(), Some("Show help"));
        assert_eq!(u.score, Some(2.0));
        assert_eq!(ctx.tracker().statistics().recent_failures, 1);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].closest_match, "help");
        assert_eq!(records[0].user_input, "help me");
    }

    #[test]
    fn test_no_match_not_a_failure() {
        let recognizer = recognizer();
        let sink = MemorySink::new();
        let mut ctx = context().with_sink(sink.clone());

        let detection = recognizer.detect(&mut ctx, "good morning");
        assert!(matches!(
            detection,
            Detection::Unknown(Unrecognized {
                reason: UnknownReason::NoMatch,
                ..
            })
        ));
        assert_eq!(ctx.tracker().statistics().recent_failures, 0);
        assert_eq!(sink.records()[0].closest_match, "none");
    }

    #[test]
    fn test_sink_stores_sanitized_input() {
        let recognizer = recognizer();
        let sink = MemorySink::new();
        let mut ctx = context().with_sink(sink.clone());

        let Detection::Unknown(u) = recognizer.detect(&mut ctx, "GOOD   Morning") else {
            panic!("expected unknown");
        };
        assert_eq!(u.raw_input, "GOOD   Morning");
        let Detection::Unknown(u) = recognizer.detect(&mut ctx, "HELP   Me!") else {
            panic!("expected unknown");
        };
        assert_eq!(u.reason, UnknownReason::LowConfidence);
        assert_eq!(u.raw_input, "HELP   Me!");

        let inputs: Vec<String> = sink.records().into_iter().map(|r| r.user_input).collect();
        assert_eq!(inputs, ["good morning", "help me!"]);
    }

    #[test]
    fn test_fixed_threshold() {
        let recognizer = recognizer().with_fixed_threshold(31.0);
        let mut ctx = context();
        let detection = recognizer.detect(&mut ctx, "next slide");
        assert!(matches!(
            detection,
            Detection::Unknown(Unrecognized {
                reason: UnknownReason::LowConfidence,
                ..
            })
        ));
    }

    #[test]
    fn test_confirm_flag() {
        let specs = vec![CommandSpec::new("dim", "Dim lights", 8, &["dim lights"])];
        let catalog = CommandCatalog::build(&specs, Region::Mixed).unwrap();
        let recognizer = Recognizer::new(catalog, RankingEngine::new(MatchScorer::exact_only()));
        let mut ctx = context();
        // one shared token: 8 + 1
        let Detection::Matched(m) = recognizer.detect(&mut ctx, "dim") else {
            panic!("expected match");
        };
        assert_eq!(m.score, 9.0);
        assert!(m.confirm);
    }

    #[test]
    fn test_json_shape() {
        let recognizer = recognizer();
        let mut ctx = context();
        let json = serde_json::to_value(recognizer.detect(&mut ctx, "next slide")).unwrap();
        assert_eq!(json["result"], "matched");
        assert_eq!(json["detail"]["command"], "next");

        let json = serde_json::to_value(recognizer.detect(&mut ctx, "next slide")).unwrap();
        assert_eq!(json["result"], "rejected");
        assert_eq!(json["detail"]["kind"], "cooldown");

        let mut ctx = context();
        let json = serde_json::to_value(recognizer.detect(&mut ctx, "")).unwrap();
        assert_eq!(json["detail"]["kind"], "invalid");
        assert_eq!(json["detail"]["error"]["kind"], "empty");
    }

    #[test]
    fn test_help_text() {
        let text = recognizer().help_text();
        assert!(text.contains("next - Next slide"));
        assert!(text.contains("say: help menu"));
        assert!(text.contains("catalog v1"));
    }

    #[test]
    fn test_candidates_do_not_mutate() {
        let recognizer = recognizer();
        let candidates = recognizer.candidates("next slide help").unwrap();
        assert_eq!(candidates[0].command, "next");
        assert!(recognizer.candidates("").is_err());
    }
}
