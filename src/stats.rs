//! Detection timing and outcome counters

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Oldest samples are dropped past this many
const MAX_SAMPLES: usize = 4096;

#[derive(Clone, Copy, Debug)]
pub struct Sample {
    pub duration: Duration,
    pub phrases: usize, // phrases scanned
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Matched,
    NoMatch,
    LowConfidence,
    Cooldown,
    Invalid,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub matched: u64,
    pub no_match: u64,
    pub low_confidence: u64,
    pub cooldown: u64,
    pub invalid: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.matched + self.no_match + self.low_confidence + self.cooldown + self.invalid
    }
}

#[derive(Clone, Debug, Default)]
pub struct DetectionStats {
    scans: VecDeque<Sample>,
    counts: OutcomeCounts,
}

impl DetectionStats {
    pub fn count(&mut self, outcome: Outcome) {
        let slot = match outcome {
            Outcome::Matched => &mut self.counts.matched,
            Outcome::NoMatch => &mut self.counts.no_match,
            Outcome::LowConfidence => &mut self.counts.low_confidence,
            Outcome::Cooldown => &mut self.counts.cooldown,
            Outcome::Invalid => &mut self.counts.invalid,
        };
        *slot += 1;
    }

    pub fn counts(&self) -> OutcomeCounts {
        self.counts
    }

    pub fn scans(&self) -> impl Iterator<Item = &Sample> {
        self.scans.iter()
    }

    fn push(&mut self, sample: Sample) {
        if self.scans.len() == MAX_SAMPLES {
            self.scans.pop_front();
        }
        self.scans.push_back(sample);
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let c = &self.counts;

        if c.total() > 0 {
            out.push_str(&format!(
                "Detections (n={}): matched={} no_match={} low_confidence={} cooldown={} invalid={}\n",
                c.total(),
                c.matched,
                c.no_match,
                c.low_confidence,
                c.cooldown,
                c.invalid
            ));
        }

        if !self.scans.is_empty() {
            let (avg, min, max, total) = self.calc();
            let phrases: usize = self.scans.iter().map(|s| s.phrases).sum();
            let rate = phrases as f64 / total.as_secs_f64().max(f64::EPSILON);
            out.push_str(&format!(
                "Scans (n={}): avg={}us min={}us max={}us total={:.3}s ~{:.0} phrases/s\n",
                self.scans.len(),
                avg.as_micros(),
                min.as_micros(),
                max.as_micros(),
                total.as_secs_f64(),
                rate
            ));
        }

        if out.is_empty() {
            out.push_str("No stats recorded yet.\n");
        }
        out
    }

    fn calc(&self) -> (Duration, Duration, Duration, Duration) {
        let total: Duration = self.scans.iter().map(|s| s.duration).sum();
        let avg = total / self.scans.len().max(1) as u32;
        let min = self.scans.iter().map(|s| s.duration).min().unwrap_or_default();
        let max = self.scans.iter().map(|s| s.duration).max().unwrap_or_default();
        (avg, min, max, total)
    }
}

/// Times one catalog scan
pub struct Timer {
    start: Instant,
    phrases: usize,
}

impl Timer {
    pub fn new(phrases: usize) -> Self {
        Self {
            start: Instant::now(),
            phrases,
        }
    }

    pub fn finish(self, stats: &mut DetectionStats) {
        stats.push(Sample {
            duration: self.start.elapsed(),
            phrases: self.phrases,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary() {
        assert_eq!(DetectionStats::default().summary(), "No stats recorded yet.\n");
    }

    #[test]
    fn test_counts_and_samples() {
        let mut stats = DetectionStats::default();
        stats.count(Outcome::Matched);
        stats.count(Outcome::Matched);
        stats.count(Outcome::Cooldown);
        Timer::new(120).finish(&mut stats);

        assert_eq!(stats.counts().matched, 2);
        assert_eq!(stats.counts().total(), 3);
        assert_eq!(stats.scans().count(), 1);
        let summary = stats.summary();
        assert!(summary.contains("matched=2"));
        assert!(summary.contains("Scans (n=1)"));
    }

    #[test]
    fn test_samples_bounded() {
        let mut stats = DetectionStats::default();
        for _ in 0..MAX_SAMPLES + 10 {
            Timer::new(1).finish(&mut stats);
        }
        assert_eq!(stats.scans().count(), MAX_SAMPLES);
    }
}
