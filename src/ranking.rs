//! Candidate ranking over a catalog snapshot

use serde::Serialize;
use std::cmp::Ordering;
use std::thread;

use crate::catalog::{CanonicalCommand, CommandCatalog, Phrase};
use crate::scorer::{MatchScorer, Utterance};

/// One scored (command, phrase) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub command: String,
    pub phrase: String,
    pub score: f64,
    pub max_score: f64,
    pub description: String,
    pub quality: f64,
    pub token_count: usize,
}

/// Ranking order: score, then match quality, then phrase length in tokens,
/// all descending. `Less` means `a` ranks ahead of `b`.
pub fn compare_candidates(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    rank_order(
        (a.score, a.quality, a.token_count),
        (b.score, b.quality, b.token_count),
    )
}

fn rank_order(a: (f64, f64, usize), b: (f64, f64, usize)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| b.1.total_cmp(&a.1))
        .then_with(|| b.2.cmp(&a.2))
}

/// Borrowed candidate used during the scan; materialized only for winners
#[derive(Clone, Copy)]
struct Scored<'a> {
    command: &'a CanonicalCommand,
    phrase: &'a Phrase,
    score: f64,
    quality: f64,
}

impl Scored<'_> {
    fn key(&self) -> (f64, f64, usize) {
        (self.score, self.quality, self.phrase.token_count())
    }

    fn to_candidate(self) -> MatchCandidate {
        MatchCandidate {
            command: self.command.id().to_string(),
            phrase: self.phrase.as_str().to_string(),
            score: self.score,
            max_score: self.command.max_score(),
            description: self.command.description().to_string(),
            quality: self.quality,
            token_count: self.phrase.token_count(),
        }
    }
}

#[derive(Debug)]
pub struct RankingEngine {
    scorer: MatchScorer,
    workers: usize,
    shard_min_phrases: usize,
}

impl RankingEngine {
    /// Sequential scan
    pub fn new(scorer: MatchScorer) -> Self {
        Self {
            scorer,
            workers: 1,
            shard_min_phrases: usize::MAX,
        }
    }

    /// Split scans of catalogs with at least `min_phrases` phrases across
    /// `workers` scoped threads
    pub fn with_sharding(mut self, workers: usize, min_phrases: usize) -> Self {
        self.workers = workers.max(1);
        self.shard_min_phrases = min_phrases;
        self
    }

    pub fn scorer(&self) -> &MatchScorer {
        &self.scorer
    }

    fn scored<'a>(
        &self,
        command: &'a CanonicalCommand,
        phrase: &'a Phrase,
        utterance: &Utterance,
    ) -> Option<Scored<'a>> {
        let score = self.scorer.score(utterance, phrase, command.weight());
        (score > 0.0).then(|| Scored {
            command,
            phrase,
            score,
            quality: phrase.match_quality(utterance),
        })
    }

    /// Every positive-score candidate, best first. Equal keys keep catalog
    /// order.
    pub fn candidates(&self, catalog: &CommandCatalog, utterance: &Utterance) -> Vec<MatchCandidate> {
        let mut scored: Vec<Scored<'_>> = catalog
            .commands()
            .iter()
            .flat_map(|c| c.phrases().iter().map(move |p| (c, p)))
            .filter_map(|(c, p)| self.scored(c, p, utterance))
            .collect();
        // stable sort keeps catalog order on ties
        scored.sort_by(|a, b| rank_order(a.key(), b.key()));
        scored.into_iter().map(Scored::to_candidate).collect()
    }

    /// Top candidate only
    #[hotpath::measure]
    pub fn best(&self, catalog: &CommandCatalog, utterance: &Utterance) -> Option<MatchCandidate> {
        let best = if self.workers > 1 && catalog.phrase_count() >= self.shard_min_phrases {
            self.best_sharded(catalog, utterance)
        } else {
            let pairs = catalog
                .commands()
                .iter()
                .flat_map(|c| c.phrases().iter().map(move |p| (c, p)));
            self.best_of(pairs, utterance)
        };
        best.map(Scored::to_candidate)
    }

    fn best_of<'a, I>(&self, pairs: I, utterance: &Utterance) -> Option<Scored<'a>>
    where
        I: Iterator<Item = (&'a CanonicalCommand, &'a Phrase)>,
    {
        // min_by keeps the first of equal elements
        pairs
            .filter_map(|(c, p)| self.scored(c, p, utterance))
            .min_by(|a, b| rank_order(a.key(), b.key()))
    }

    fn best_sharded<'a>(&self, catalog: &'a CommandCatalog, utterance: &Utterance) -> Option<Scored<'a>> {
        let pairs: Vec<(&CanonicalCommand, &Phrase)> = catalog
            .commands()
            .iter()
            .flat_map(|c| c.phrases().iter().map(move |p| (c, p)))
            .collect();
        let shard_len = pairs.len().div_ceil(self.workers).max(1);

        thread::scope(|scope| {
            let handles: Vec<_> = pairs
                .chunks(shard_len)
                .map(|shard| scope.spawn(move || self.best_of(shard.iter().copied(), utterance)))
                .collect();

            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .reduce(|best, next| {
                    if rank_order(next.key(), best.key()) == Ordering::Less {
                        next
                    } else {
                        best
                    }
                })
        })
    }
}
