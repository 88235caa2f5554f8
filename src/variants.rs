//! Accent-aware spelling variants
//!
//! Expands a canonical phrase into the spellings a speech-to-text engine
//! tends to produce for Indonesian-accented English: vowel and consonant
//! drift, a fixed table of known mis-hearings for core command words, and
//! regional dialect rules layered on top.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::fuzzy::sequence_ratio;

/// Vowel drift, applied one alternative at a time
const VOWEL_PATTERNS: &[(&str, &[&str])] = &[
    ("e", &["e", "é", "è", "ə"]),
    ("a", &["a", "á", "à"]),
    ("i", &["i", "í", "ì"]),
    ("o", &["o", "ó", "ò"]),
    ("u", &["u", "ú", "ù"]),
];

const CONSONANT_PATTERNS: &[(&str, &[&str])] = &[
    ("c", &["c", "ch", "k"]),
    ("g", &["g", "ng"]),
    ("ng", &["ng", "n"]),
    ("s", &["s", "sh", "z"]),
    ("j", &["j", "dj"]),
    ("y", &["y", "i"]),
];

/// Known transcriptions of core command words. A word listed here uses
/// exactly these spellings instead of the vowel and consonant rules.
const WORD_SUBSTITUTIONS: &[(&str, &[&str])] = &[
    (
        "next",
        &[
            "next", "neks", "nekst", "nex", "nek", "naxs", "necks", "nexx", "nekes", "nexs",
            "translate", "teks",
        ],
    ),
    (
        "slide",
        &[
            "slide", "slaid", "slid", "slyde", "lite", "slait", "slyd", "sled", "slets", "slet",
        ],
    ),
    (
        "back",
        &[
            "back", "bak", "bek", "bæk", "beck", "bakk", "bake", "bax", "bakc", "bag", "beg",
        ],
    ),
    (
        "previous",
        &[
            "previous", "previeus", "privieus", "reviews", "previus", "preveus", "previws",
            "prevews", "privius", "priviws",
        ],
    ),
    (
        "open",
        &[
            "open", "opèn", "opén", "opin", "opeen", "openn", "opem", "opun", "aupèn", "aupén",
            "aupin", "aupen", "aupenn", "aupem", "aupun",
        ],
    ),
    (
        "close",
        &[
            "close", "klos", "klous", "kloz", "cloze", "clous", "cloz", "kloze", "kloas",
            "kloes", "kloaz",
        ],
    ),
    ("help", &["help", "hèlp", "hélp", "hep"]),
    (
        "stop",
        &[
            "stop", "estop", "istop", "stap", "stòp", "stóp", "stopp", "stope", "stoup", "stob",
            "setop",
        ],
    ),
    (
        "show",
        &[
            "show", "sho", "sow", "syow", "shou", "shoo", "shouw", "shoa", "shoe", "shouh",
            "showw",
        ],
    ),
    (
        "menu",
        &[
            "menu", "mènu", "ménu", "meenu", "minu", "manu", "menuu", "menou", "menue", "manou",
            "manue", "minou", "minue",
        ],
    ),
];

/// Word-final consonants that Javanese speakers tend to swallow
const JAVANESE_DROPPED_FINALS: &str = "tpskcng";

/// Regional dialect family used when expanding phrases
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Javanese,
    Sundanese,
    Betawi,
    /// All three families, applied in order
    #[default]
    Mixed,
}

impl Region {
    fn javanese(self) -> bool {
        matches!(self, Region::Javanese | Region::Mixed)
    }

    fn sundanese(self) -> bool {
        matches!(self, Region::Sundanese | Region::Mixed)
    }

    fn betawi(self) -> bool {
        matches!(self, Region::Betawi | Region::Mixed)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::Javanese => "javanese",
            Region::Sundanese => "sundanese",
            Region::Betawi => "betawi",
            Region::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown region '{0}' (expected javanese, sundanese, betawi or mixed)")]
pub struct UnknownRegion(pub String);

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "javanese" => Ok(Region::Javanese),
            "sundanese" => Ok(Region::Sundanese),
            "betawi" => Ok(Region::Betawi),
            "mixed" => Ok(Region::Mixed),
            _ => Err(UnknownRegion(s.to_string())),
        }
    }
}

/// Expand a phrase into its accent variants. Always contains `phrase`.
///
/// The first two words are expanded and cross-multiplied; any further words
/// are appended verbatim.
pub fn generate_variants(phrase: &str) -> BTreeSet<String> {
    let mut variants = BTreeSet::new();
    variants.insert(phrase.to_string());

    let lower = phrase.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let expanded: Vec<BTreeSet<String>> = words.iter().take(2).map(|w| word_variants(w)).collect();

    match (expanded.first(), expanded.get(1)) {
        (Some(first), None) => variants.extend(first.iter().cloned()),
        (Some(first), Some(second)) => {
            let rest = words[2..].join(" ");
            for a in first {
                for b in second {
                    if rest.is_empty() {
                        variants.insert(format!("{a} {b}"));
                    } else {
                        variants.insert(format!("{a} {b} {rest}"));
                    }
                }
            }
        }
        _ => {}
    }

    variants
}

fn word_variants(word: &str) -> BTreeSet<String> {
    if let Some((_, spellings)) = WORD_SUBSTITUTIONS.iter().find(|(w, _)| *w == word) {
        return spellings.iter().map(|s| s.to_string()).collect();
    }

    let mut out = BTreeSet::new();
    out.insert(word.to_string());
    for (source, alternatives) in VOWEL_PATTERNS.iter().chain(CONSONANT_PATTERNS) {
        if word.contains(source) {
            out.extend(alternatives.iter().map(|alt| word.replace(source, alt)));
        }
    }
    out
}

/// Base variants plus the dialect rules enabled for `region`.
/// Rules stack: Javanese output feeds Sundanese, which feeds Betawi.
pub fn add_regional_variants(phrase: &str, region: Region) -> BTreeSet<String> {
    let mut variants: Vec<String> = generate_variants(phrase).into_iter().collect();

    if region.javanese() {
        let extra: Vec<String> = variants
            .iter()
            .flat_map(|v| {
                let mut out = Vec::with_capacity(2);
                if let Some(last) = v.chars().last().filter(|c| JAVANESE_DROPPED_FINALS.contains(*c)) {
                    out.push(v[..v.len() - last.len_utf8()].to_string());
                }
                out.push(v.replace("ng", "n"));
                out
            })
            .collect();
        variants.extend(extra);
    }

    if region.sundanese() {
        let extra: Vec<String> = variants
            .iter()
            .flat_map(|v| [v.replace('e', "i"), v.replace('o', "u")])
            .collect();
        variants.extend(extra);
    }

    if region.betawi() {
        let extra: Vec<String> = variants
            .iter()
            .map(|v| {
                v.split_whitespace()
                    .filter(|w| w.chars().count() > 2)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        variants.extend(extra);
    }

    variants.into_iter().collect()
}

/// Lowercase and strip accents down to base letters (`opèn` -> `open`)
pub fn fold_diacritics(text: &str) -> String {
    text.to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// Distance in `[0, 1]` between two spellings after folding diacritics.
/// 0 means identical.
pub fn phonetic_distance(a: &str, b: &str) -> f64 {
    1.0 - sequence_ratio(&fold_diacritics(a), &fold_diacritics(b))
}
