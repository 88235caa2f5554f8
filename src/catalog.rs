//! Command catalog
//!
//! Immutable, versioned registry of canonical commands and their expanded
//! phrase sets. Learning a pronunciation never edits a catalog in place: it
//! derives a new version and publishes it through [`CatalogHandle`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

use crate::scorer::Utterance;
use crate::variants::{Region, add_regional_variants, generate_variants};

/// Shortest phrase kept in a catalog, in characters
pub const MIN_PHRASE_CHARS: usize = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Ids are lowercase ascii letters, digits and underscores
    #[error("invalid command id '{0}'")]
    InvalidId(String),

    #[error("command '{0}' has a weight of zero")]
    ZeroWeight(String),

    #[error("command '{0}' has no phrases")]
    NoPhrases(String),

    #[error("command '{0}' is defined more than once")]
    DuplicateId(String),

    #[error("phrase '{phrase}' of command '{command}' is shorter than 2 characters")]
    PhraseTooShort { command: String, phrase: String },

    /// Seeded phrases must have exactly one owner
    #[error("phrase '{phrase}' is listed under both '{first}' and '{second}'")]
    DuplicatePhrase {
        phrase: String,
        first: String,
        second: String,
    },

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("phrase '{phrase}' already belongs to command '{owner}'")]
    PhraseOwned { phrase: String, owner: String },

    #[error("phrase '{phrase}' cannot be learned: {reason}")]
    InvalidPhrase { phrase: String, reason: String },
}

/// Command definition as it appears in config
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CommandSpec {
    pub id: String,
    pub description: String,
    pub weight: u32,
    /// Add accent and regional variants of every seeded phrase
    #[serde(default)]
    pub expand: bool,
    pub phrases: Vec<String>,
}

impl CommandSpec {
    pub fn new(id: &str, description: &str, weight: u32, phrases: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            weight,
            expand: false,
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn expanded(mut self) -> Self {
        self.expand = true;
        self
    }
}

/// One matchable phrase with its token set precomputed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
    text: String,
    unique_tokens: Vec<String>,
    token_count: usize,
}

impl Phrase {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let token_count = text.split_whitespace().count();
        let unique_tokens: BTreeSet<&str> = text.split_whitespace().collect();
        let unique_tokens = unique_tokens.into_iter().map(str::to_string).collect();
        Self {
            text,
            unique_tokens,
            token_count,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Distinct phrase tokens that also occur in the utterance
    pub fn shared_tokens(&self, utterance: &Utterance) -> usize {
        self.unique_tokens
            .iter()
            .filter(|t| utterance.has_token(t))
            .count()
    }

    /// Fraction of distinct phrase tokens present in the utterance
    pub fn match_quality(&self, utterance: &Utterance) -> f64 {
        self.shared_tokens(utterance) as f64 / self.unique_tokens.len().max(1) as f64
    }
}

#[derive(Debug, Clone)]
pub struct CanonicalCommand {
    id: String,
    description: String,
    weight: u32,
    seeds: Vec<String>,
    phrases: Vec<Phrase>,
}

impl CanonicalCommand {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Phrases as written in config, before expansion
    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    pub fn phrases(&self) -> &[Phrase] {
        &self.phrases
    }

    pub fn max_score(&self) -> f64 {
        f64::from(self.weight) + crate::scorer::EXACT_BONUS
    }

    pub fn contains(&self, phrase: &str) -> bool {
        self.phrases.iter().any(|p| p.as_str() == phrase)
    }
}

/// Lowercase and collapse runs of whitespace
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// A single immutable catalog version
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    version: u64,
    region: Region,
    commands: Vec<CanonicalCommand>,
    owners: HashMap<String, usize>,
}

impl CommandCatalog {
    /// Build version 1 from config definitions.
    ///
    /// Seeded phrases are claimed first, so a generated variant never steals
    /// a phrase another command lists explicitly.
    pub fn build(specs: &[CommandSpec], region: Region) -> Result<Self, CatalogError> {
        let mut owners: HashMap<String, usize> = HashMap::new();
        let mut sets: Vec<BTreeSet<String>> = Vec::with_capacity(specs.len());
        let mut seeds: Vec<Vec<String>> = Vec::with_capacity(specs.len());
        let mut seen_ids = BTreeSet::new();

        for (index, spec) in specs.iter().enumerate() {
            if !valid_id(&spec.id) {
                return Err(CatalogError::InvalidId(spec.id.clone()));
            }
            if !seen_ids.insert(spec.id.as_str()) {
                return Err(CatalogError::DuplicateId(spec.id.clone()));
            }
            if spec.weight == 0 {
                return Err(CatalogError::ZeroWeight(spec.id.clone()));
            }
            if spec.phrases.is_empty() {
                return Err(CatalogError::NoPhrases(spec.id.clone()));
            }

            let mut set = BTreeSet::new();
            let mut seeded = Vec::with_capacity(spec.phrases.len());
            for raw in &spec.phrases {
                let phrase = normalize_phrase(raw);
                if phrase.chars().count() < MIN_PHRASE_CHARS {
                    return Err(CatalogError::PhraseTooShort {
                        command: spec.id.clone(),
                        phrase: raw.clone(),
                    });
                }
                match owners.get(&phrase) {
                    Some(&owner) if owner != index => {
                        return Err(CatalogError::DuplicatePhrase {
                            phrase,
                            first: specs[owner].id.clone(),
                            second: spec.id.clone(),
                        });
                    }
                    _ => {}
                }
                owners.insert(phrase.clone(), index);
                if !seeded.contains(&phrase) {
                    seeded.push(phrase.clone());
                }
                set.insert(phrase);
            }
            sets.push(set);
            seeds.push(seeded);
        }

        for (index, spec) in specs.iter().enumerate() {
            if !spec.expand {
                continue;
            }
            let mut dropped = 0usize;
            for seed in &seeds[index] {
                let mut expanded = generate_variants(seed);
                expanded.extend(add_regional_variants(seed, region));
                for variant in expanded {
                    let variant = normalize_phrase(&variant);
                    if variant.chars().count() < MIN_PHRASE_CHARS {
                        continue;
                    }
                    match owners.get(&variant) {
                        Some(&owner) if owner != index => dropped += 1,
                        Some(_) => {}
                        None => {
                            owners.insert(variant.clone(), index);
                            sets[index].insert(variant);
                        }
                    }
                }
            }
            debug!(
                command = %spec.id,
                phrases = sets[index].len(),
                dropped,
                "expanded command phrases"
            );
        }

        let commands = specs
            .iter()
            .zip(sets)
            .zip(seeds)
            .map(|((spec, set), seeds)| CanonicalCommand {
                id: spec.id.clone(),
                description: spec.description.clone(),
                weight: spec.weight,
                seeds,
                phrases: set.into_iter().map(Phrase::new).collect(),
            })
            .collect();

        Ok(Self {
            version: 1,
            region,
            commands,
            owners,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn commands(&self) -> &[CanonicalCommand] {
        &self.commands
    }

    pub fn get(&self, id: &str) -> Option<&CanonicalCommand> {
        self.commands.iter().find(|c| c.id == id)
    }

    /// Id of the command that owns `phrase`, if any
    pub fn owner_of(&self, phrase: &str) -> Option<&str> {
        self.owners
            .get(phrase)
            .map(|&index| self.commands[index].id.as_str())
    }

    pub fn phrase_count(&self) -> usize {
        self.owners.len()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Derive the next version with `phrase` added to `command`.
    ///
    /// Returns `Ok(None)` when the command already has the phrase.
    pub fn with_learned_phrase(
        &self,
        command: &str,
        phrase: &str,
    ) -> Result<Option<CommandCatalog>, CatalogError> {
        let index = self
            .commands
            .iter()
            .position(|c| c.id == command)
            .ok_or_else(|| CatalogError::UnknownCommand(command.to_string()))?;

        let phrase = normalize_phrase(phrase);
        if phrase.chars().count() < MIN_PHRASE_CHARS {
            return Err(CatalogError::PhraseTooShort {
                command: command.to_string(),
                phrase,
            });
        }
        match self.owners.get(&phrase) {
            Some(&owner) if owner == index => return Ok(None),
            Some(&owner) => {
                return Err(CatalogError::PhraseOwned {
                    phrase,
                    owner: self.commands[owner].id.clone(),
                });
            }
            None => {}
        }

        let mut next = self.clone();
        next.version += 1;
        next.owners.insert(phrase.clone(), index);
        let target = &mut next.commands[index];
        let at = target
            .phrases
            .partition_point(|p| p.as_str() < phrase.as_str());
        target.phrases.insert(at, Phrase::new(phrase));
        Ok(Some(next))
    }
}

/// Publication point for catalog versions. Readers take an `Arc` snapshot
/// per call and never observe a half-built catalog.
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<CommandCatalog>>,
}

impl CatalogHandle {
    pub fn new(catalog: CommandCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn snapshot(&self) -> Arc<CommandCatalog> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Derive and publish a new version under the write lock, so concurrent
    /// learners cannot overwrite each other. Returns the published version.
    pub fn update<F>(&self, derive: F) -> Result<Option<u64>, CatalogError>
    where
        F: FnOnce(&CommandCatalog) -> Result<Option<CommandCatalog>, CatalogError>,
    {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match derive(&current)? {
            Some(next) => {
                let version = next.version;
                *current = Arc::new(next);
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }
}
