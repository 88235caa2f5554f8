use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::catalog::CommandSpec;
use crate::fuzzy::FuzzyStrategy;
use crate::threshold::{AcceptanceMode, MAX_THRESHOLD, MIN_THRESHOLD, TrackerSettings};
use crate::variants::Region;

pub const DEFAULT_CONFIG_PATH: &str = "voxmatch.toml";
pub const CONFIG_ENV: &str = "VOXMATCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub threshold: ThresholdConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default = "default_commands")]
    pub commands: Vec<CommandSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            threshold: ThresholdConfig::default(),
            learning: LearningConfig::default(),
            sink: SinkConfig::default(),
            commands: default_commands(),
        }
    }
}

// ============================================================================
// Detector Config
// ============================================================================

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Minimum seconds between accepted commands
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    /// Dialect rules used when expanding phrases
    #[serde(default)]
    pub region: Region,
    /// "ratio", "levenshtein" or "none"
    #[serde(default)]
    pub fuzzy: FuzzyStrategy,
    /// Threads used to scan large catalogs (1 = sequential)
    #[serde(default = "default_scan_workers")]
    pub scan_workers: usize,
    /// Catalogs smaller than this are always scanned sequentially
    #[serde(default = "default_shard_min_phrases")]
    pub shard_min_phrases: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            region: Region::default(),
            fuzzy: FuzzyStrategy::default(),
            scan_workers: default_scan_workers(),
            shard_min_phrases: default_shard_min_phrases(),
        }
    }
}

impl DetectorConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_cooldown_secs()))
    }
}

fn default_cooldown_secs() -> f64 {
    2.0
}

fn default_scan_workers() -> usize {
    1
}

fn default_shard_min_phrases() -> usize {
    4096
}

// ============================================================================
// Threshold Config
// ============================================================================

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ThresholdConfig {
    /// "adaptive" or "fixed"
    #[serde(default)]
    pub mode: AcceptanceMode,
    /// Starting point for the adaptive threshold
    #[serde(default = "default_base_threshold")]
    pub base: f64,
    /// Threshold used in fixed mode
    #[serde(default = "default_fixed_threshold")]
    pub fixed: f64,
    /// Accepted scores in [confirm_low, confirm_high) are flagged for confirmation
    #[serde(default = "default_confirm_low")]
    pub confirm_low: f64,
    #[serde(default = "default_confirm_high")]
    pub confirm_high: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            mode: AcceptanceMode::default(),
            base: default_base_threshold(),
            fixed: default_fixed_threshold(),
            confirm_low: default_confirm_low(),
            confirm_high: default_confirm_high(),
        }
    }
}

fn default_base_threshold() -> f64 {
    6.0
}

fn default_fixed_threshold() -> f64 {
    8.0
}

fn default_confirm_low() -> f64 {
    8.0
}

fn default_confirm_high() -> f64 {
    12.0
}

// ============================================================================
// Learning Config
// ============================================================================

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LearningConfig {
    /// Promote repeated near-misses into the closest command's phrases
    #[serde(default = "default_auto_promote")]
    pub auto_promote: bool,
    #[serde(default = "default_min_attempts")]
    pub min_attempts: u32,
    #[serde(default = "default_min_best_score")]
    pub min_best_score: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            auto_promote: default_auto_promote(),
            min_attempts: default_min_attempts(),
            min_best_score: default_min_best_score(),
        }
    }
}

fn default_auto_promote() -> bool {
    true
}

fn default_min_attempts() -> u32 {
    3
}

fn default_min_best_score() -> f64 {
    5.0
}

// ============================================================================
// Sink Config
// ============================================================================

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SinkConfig {
    #[serde(default = "default_sink_enabled")]
    pub enabled: bool,
    /// JSON lines file for unrecognized input
    #[serde(default = "default_sink_path")]
    pub path: PathBuf,
    /// Records queued for the writer before new ones are dropped
    #[serde(default = "default_sink_capacity")]
    pub capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: default_sink_enabled(),
            path: default_sink_path(),
            capacity: default_sink_capacity(),
        }
    }
}

fn default_sink_enabled() -> bool {
    true
}

fn default_sink_path() -> PathBuf {
    "unrecognized_commands.jsonl".into()
}

fn default_sink_capacity() -> usize {
    256
}

// ============================================================================
// Commands
// ============================================================================

/// Presentation control commands, with English and Indonesian phrasings
pub fn default_commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new(
            "next",
            "Next slide",
            10,
            &["next slide", "slide next", "lanjut slide", "slide lanjut"],
        )
        .expanded(),
        CommandSpec::new(
            "previous",
            "Previous slide",
            10,
            &[
                "back slide",
                "slide back",
                "mundur slide",
                "slide mundur",
                "previous slide",
                "slide previous",
            ],
        )
        .expanded(),
        CommandSpec::new(
            "open_slideshow",
            "Open slideshow (F5)",
            18,
            &[
                "open slide show",
                "slide show open",
                "start slide show",
                "slide show start",
                "mulai slide show",
                "slide show mulai",
                "buka slide show",
                "slide show buka",
                "f5",
                "mulai presentasi",
                "presentasi mulai",
                "buka presentasi",
                "presentasi buka",
                "start presentation",
                "presentation start",
                "open slide",
                "open side show",
                "open slideshows",
            ],
        ),
        CommandSpec::new(
            "close_slideshow",
            "Close slideshow (ESC)",
            18,
            &[
                "close slide show",
                "slide show close",
                "quit slide show",
                "slide show quit",
                "keluar slide show",
                "slide show keluar",
                "tutup slide show",
                "slide show tutup",
                "stop slide show",
                "slide show stop",
                "akhiri presentasi",
                "presentasi akhiri",
                "tutup presentasi",
                "presentasi tutup",
                "end presentation",
                "presentation end",
                "exit slideshow",
                "slideshow exit",
                "close slide",
                "close side show",
                "close slideshows",
            ],
        ),
        CommandSpec::new(
            "help",
            "Show help",
            8,
            &[
                "help menu",
                "menu help",
                "bantuan menu",
                "menu bantuan",
                "helm menu",
                "hal menu",
                "helmmu",
                "menu bantu",
                "menu bantuanmu",
                "menu bantuin",
                "held menu",
                "hell menu",
                "help me menu",
            ],
        ),
        CommandSpec::new(
            "stop",
            "Stop program",
            15,
            &[
                "stop program",
                "program stop",
                "berhenti program",
                "program berhenti",
                "stop",
                "berhenti",
                "stok program",
                "setiap program",
                "top program",
                "stop programnya",
                "stop progran",
            ],
        ),
        CommandSpec::new(
            "test",
            "Test microphone",
            8,
            &[
                "test mic",
                "mic test",
                "test microphone",
                "microphone test",
                "test audio",
                "audio test",
            ],
        ),
        CommandSpec::new(
            "noise",
            "Toggle noise reduction",
            8,
            &[
                "toggle noise",
                "noise toggle",
                "noise reduction",
                "reduction noise",
                "noise on",
                "noise off",
            ],
        ),
        CommandSpec::new(
            "popup_on",
            "Show accessibility popup",
            8,
            &[
                "popup on",
                "show popup",
                "popup show",
                "enable popup",
                "popup enable",
                "turn on popup",
                "popup turn on",
            ],
        ),
        CommandSpec::new(
            "popup_off",
            "Hide accessibility popup",
            8,
            &[
                "popup off",
                "hide popup",
                "popup hide",
                "disable popup",
                "popup disable",
                "turn off popup",
                "popup turn off",
            ],
        ),
        CommandSpec::new(
            "caption_on",
            "Start live captions",
            8,
            &[
                "caption on",
                "start caption",
                "caption start",
                "enable caption",
                "caption enable",
                "turn on caption",
                "caption turn on",
                "live caption on",
                "caption live on",
            ],
        ),
        CommandSpec::new(
            "caption_off",
            "Stop live captions",
            12,
            &[
                "caption off",
                "stop caption",
                "caption stop",
                "disable caption",
                "caption disable",
                "turn off caption",
                "caption turn off",
                "live caption off",
                "caption live off",
            ],
        ),
        CommandSpec::new(
            "change_language",
            "Change caption language",
            7,
            &[
                "change language",
                "language change",
                "switch language",
                "language switch",
                "ganti bahasa",
                "bahasa ganti",
            ],
        ),
        CommandSpec::new(
            "show_analytics",
            "Show session analytics",
            7,
            &[
                "show analytics",
                "analytics show",
                "display analytics",
                "analytics display",
                "session stats",
                "stats session",
            ],
        ),
    ]
}

impl Config {
    /// Load from `path`, else `$VOXMATCH_CONFIG`, else `voxmatch.toml`.
    ///
    /// An explicitly named file must exist. A missing default file gives the
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let path = match explicit {
            Some(path) => path,
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !path.exists() {
                    return Ok(Config::default());
                }
                path
            }
        };

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Config =
            toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.threshold;
        let in_band = |v: f64| (MIN_THRESHOLD..=MAX_THRESHOLD).contains(&v);

        if !in_band(t.base) {
            return Err(ConfigError::Invalid(format!(
                "threshold.base {} outside [{MIN_THRESHOLD}, {MAX_THRESHOLD}]",
                t.base
            )));
        }
        if !t.fixed.is_finite() || t.fixed < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "threshold.fixed {} must be a non-negative number",
                t.fixed
            )));
        }
        if !(t.confirm_low.is_finite() && t.confirm_high.is_finite()) || t.confirm_low >= t.confirm_high {
            return Err(ConfigError::Invalid(format!(
                "threshold.confirm_low {} must be below confirm_high {}",
                t.confirm_low, t.confirm_high
            )));
        }
        if Duration::try_from_secs_f64(self.detector.cooldown_secs).is_err() {
            return Err(ConfigError::Invalid(format!(
                "detector.cooldown_secs {} must be a non-negative number",
                self.detector.cooldown_secs
            )));
        }
        if self.detector.scan_workers == 0 {
            return Err(ConfigError::Invalid("detector.scan_workers must be at least 1".into()));
        }
        if !self.learning.min_best_score.is_finite() {
            return Err(ConfigError::Invalid("learning.min_best_score must be a number".into()));
        }
        if self.commands.is_empty() {
            return Err(ConfigError::Invalid("no commands defined".into()));
        }
        if let Some(c) = self.commands.iter().find(|c| c.weight == 0) {
            return Err(ConfigError::Invalid(format!("command '{}' has weight 0", c.id)));
        }
        Ok(())
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            base: self.threshold.base,
            confirm_low: self.threshold.confirm_low,
            confirm_high: self.threshold.confirm_high,
            learn_min_attempts: self.learning.min_attempts,
            learn_min_score: self.learning.min_best_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CommandCatalog;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.cooldown(), Duration::from_secs(2));
        assert_eq!(config.threshold.mode, AcceptanceMode::Adaptive);
        assert_eq!(config.threshold.base, 6.0);
        assert_eq!(config.threshold.fixed, 8.0);
        assert_eq!(config.commands.len(), 14);
    }

    #[test]
    fn test_default_commands_build() {
        let config = Config::default();
        let catalog = CommandCatalog::build(&config.commands, config.detector.region).unwrap();
        assert_eq!(catalog.len(), 14);
        assert!(catalog.phrase_count() > 1000);
        assert_eq!(catalog.owner_of("f5"), Some("open_slideshow"));
        assert_eq!(catalog.owner_of("neks slaid"), Some("next"));
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_round_trip() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
            [detector]
            cooldown_secs = 0.5
            region = "javanese"
            fuzzy = "none"

            [threshold]
            mode = "fixed"

            [[commands]]
            id = "lights"
            description = "Toggle lights"
            weight = 5
            phrases = ["lights on", "lights off"]
            "#,
        )
        .unwrap();
        assert_eq!(config.detector.cooldown(), Duration::from_millis(500));
        assert_eq!(config.detector.region, Region::Javanese);
        assert_eq!(config.detector.fuzzy, FuzzyStrategy::None);
        assert_eq!(config.detector.scan_workers, 1);
        assert_eq!(config.threshold.mode, AcceptanceMode::Fixed);
        assert_eq!(config.threshold.fixed, 8.0);
        assert_eq!(config.commands.len(), 1);
        assert!(!config.commands[0].expand);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            Config::from_toml_str("[threshold]\nbase = 9.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[threshold]\nconfirm_low = 12.0\nconfirm_high = 8.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[detector]\ncooldown_secs = -1.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[detector]\nscan_workers = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[threshold]\nmode = \"sometimes\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxmatch.toml");
        fs::write(&path, "[sink]\nenabled = false\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert!(!config.sink.enabled);
        assert_eq!(config.sink.capacity, 256);
    }
}
