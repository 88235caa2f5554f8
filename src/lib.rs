//! Accent-tolerant voice command recognition.
//!
//! Takes already-transcribed text, which is often garbled by accents and
//! recognizer drift, and decides which canonical command the speaker meant:
//!
//! ```no_run
//! use voxmatch::{Config, DetectContext, Recognizer};
//!
//! let config = Config::default();
//! let recognizer = Recognizer::from_config(&config)?;
//! let mut ctx = DetectContext::from_config(&config);
//! println!("{}", recognizer.detect(&mut ctx, "neks slaid"));
//! # Ok::<(), voxmatch::CatalogError>(())
//! ```

pub mod catalog;
pub mod config;
pub mod cooldown;
pub mod detector;
pub mod fuzzy;
pub mod ranking;
pub mod scorer;
pub mod sink;
pub mod stats;
pub mod threshold;
pub mod validator;
pub mod variants;

pub use catalog::{CanonicalCommand, CatalogError, CatalogHandle, CommandCatalog, CommandSpec};
pub use config::{Config, ConfigError};
pub use detector::{
    CommandMatch, DetectContext, Detection, Recognizer, Rejection, UnknownReason, Unrecognized,
};
pub use fuzzy::FuzzyStrategy;
pub use ranking::{MatchCandidate, RankingEngine};
pub use scorer::{MatchScorer, Utterance};
pub use sink::{JsonlSink, MemorySink, NullSink, SinkError, UnrecognizedRecord, UnrecognizedSink};
pub use threshold::{AcceptanceMode, AdaptiveThresholdTracker, TrackerSettings};
pub use validator::{ValidationError, Validator};
pub use variants::{Region, add_regional_variants, generate_variants, phonetic_distance};
