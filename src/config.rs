//! Analysis configuration
//!
//! Every setting has a default matching the published analysis, so a config
//! file only needs the keys it changes. Files are TOML:
//!
//! ```toml
//! accuracy_threshold = 0.8
//! excluded_participants = ["17", "23"]
//!
//! [positions]
//! order = ["subject_det", "subject_noun", "main_verb", "spillover_1"]
//! aliases = { verb_opt = "main_verb", verb_ot = "main_verb" }
//!
//! [models]
//! critical_positions = ["main_verb", "spillover_1"]
//! ```

use crate::error::AnalysisError;
use crate::model::{NelderMeadOptions, RandomEffectsSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum filler accuracy to keep a participant (0-1)
    pub accuracy_threshold: f64,
    /// Participant ids excluded regardless of accuracy
    pub excluded_participants: Vec<String>,
    /// Reading times at or below this are dropped (ms)
    pub rt_min_ms: f64,
    /// Reading times above this are dropped (ms)
    pub rt_max_ms: f64,
    /// Winsorization cap in standard deviations above the category mean
    pub winsor_sd: f64,
    /// Field delimiter; inferred from the file extension when unset
    pub delimiter: Option<char>,
    pub positions: PositionScheme,
    pub models: ModelConfig,
    pub chart: ChartConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold: 0.8,
            excluded_participants: Vec::new(),
            rt_min_ms: 100.0,
            rt_max_ms: 4000.0,
            winsor_sd: 2.5,
            delimiter: None,
            positions: PositionScheme::default(),
            models: ModelConfig::default(),
            chart: ChartConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let content = fs::read_to_string(path).map_err(|e| {
            AnalysisError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, AnalysisError> {
        let config: AnalysisConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML (used to print the effective configuration)
    pub fn to_toml_string(&self) -> Result<String, AnalysisError> {
        toml::to_string_pretty(self).map_err(|e| AnalysisError::Config(e.to_string()))
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(0.0..=1.0).contains(&self.accuracy_threshold) {
            return Err(AnalysisError::Config(format!(
                "accuracy_threshold must be within [0, 1], got {}",
                self.accuracy_threshold
            )));
        }
        if self.rt_min_ms >= self.rt_max_ms {
            return Err(AnalysisError::Config(format!(
                "rt_min_ms ({}) must be below rt_max_ms ({})",
                self.rt_min_ms, self.rt_max_ms
            )));
        }
        if !(self.winsor_sd > 0.0) {
            return Err(AnalysisError::Config(format!(
                "winsor_sd must be positive, got {}",
                self.winsor_sd
            )));
        }
        if let Some(d) = self.delimiter {
            if !d.is_ascii() || d == '"' || d == '\n' || d == '\r' {
                return Err(AnalysisError::Config(format!(
                    "delimiter must be a single ASCII character other than a quote or newline, got {:?}",
                    d
                )));
            }
        }
        self.positions.validate()?;
        self.models.validate(&self.positions)?;
        if self.chart.width == 0 || self.chart.height == 0 {
            return Err(AnalysisError::Config("chart size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Ordered word-position categories and the raw labels that map onto them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionScheme {
    /// Categories in sentence order (the chart's x axis)
    pub order: Vec<String>,
    /// Raw label → category for labels that differ from their category
    pub aliases: BTreeMap<String, String>,
}

impl Default for PositionScheme {
    fn default() -> Self {
        let order = [
            "subject_det",
            "subject_noun",
            "adverb",
            "antecedent_det",
            "antecedent_noun",
            "conjunction",
            "pronoun",
            "auxiliary",
            "main_verb",
            "spillover_1",
            "spillover_2",
            "spillover_3",
            "preposition",
            "object_det",
            "object_noun",
            "final",
        ];
        let aliases = [
            ("verb_opt", "main_verb"),
            ("verb_ot", "main_verb"),
            ("verb_control", "main_verb"),
        ];
        Self {
            order: order.iter().map(|s| s.to_string()).collect(),
            aliases: aliases
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl PositionScheme {
    /// Category of a raw word-position label
    pub fn category_of(&self, label: &str) -> Option<&str> {
        let label = label.trim();
        if let Some(cat) = self.order.iter().find(|c| c.eq_ignore_ascii_case(label)) {
            return Some(cat.as_str());
        }
        self.aliases
            .iter()
            .find(|(raw, _)| raw.eq_ignore_ascii_case(label))
            .map(|(_, cat)| cat.as_str())
    }

    pub fn contains(&self, category: &str) -> bool {
        self.order.iter().any(|c| c == category)
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        if self.order.is_empty() {
            return Err(AnalysisError::Config("positions.order is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for cat in &self.order {
            if !seen.insert(cat.to_ascii_lowercase()) {
                return Err(AnalysisError::Config(format!(
                    "duplicate position category '{}'",
                    cat
                )));
            }
        }
        for (raw, cat) in &self.aliases {
            if !self.contains(cat) {
                return Err(AnalysisError::Config(format!(
                    "alias '{}' maps to unknown category '{}'",
                    raw, cat
                )));
            }
        }
        Ok(())
    }
}

/// Critical positions and model ladders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Categories at which models are fitted
    pub critical_positions: Vec<String>,
    /// Ladder for the antecedent × verb type model
    pub ladder: Vec<RandomEffectsSpec>,
    /// Ladder for the antecedent models within each verb type
    pub pairwise_ladder: Vec<RandomEffectsSpec>,
    pub optimizer: OptimizerConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            critical_positions: ["main_verb", "spillover_1", "spillover_2", "spillover_3"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ladder: RandomEffectsSpec::default_ladder(),
            pairwise_ladder: RandomEffectsSpec::default_pairwise_ladder(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl ModelConfig {
    fn validate(&self, positions: &PositionScheme) -> Result<(), AnalysisError> {
        if self.ladder.is_empty() || self.pairwise_ladder.is_empty() {
            return Err(AnalysisError::Config("model ladders must not be empty".to_string()));
        }
        for cat in &self.critical_positions {
            if !positions.contains(cat) {
                return Err(AnalysisError::Config(format!(
                    "critical position '{}' is not in positions.order",
                    cat
                )));
            }
        }
        if self.optimizer.max_evaluations == 0 || !(self.optimizer.tolerance > 0.0) {
            return Err(AnalysisError::Config(
                "optimizer needs a positive evaluation budget and tolerance".to_string(),
            ));
        }
        Ok(())
    }
}

/// Simplex optimizer settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_evaluations: usize,
    pub tolerance: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        let defaults = NelderMeadOptions::default();
        Self {
            max_evaluations: defaults.max_evaluations,
            tolerance: defaults.f_tolerance,
        }
    }
}

impl OptimizerConfig {
    pub fn to_options(&self) -> NelderMeadOptions {
        NelderMeadOptions {
            max_evaluations: self.max_evaluations,
            f_tolerance: self.tolerance,
            ..NelderMeadOptions::default()
        }
    }
}

/// Chart output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("reading_times.svg"),
            width: 1400,
            height: 700,
            title: "Mean reading time by word position".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SlopeStructure;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.models.ladder.len(), 5);
        assert_eq!(config.positions.category_of("verb_ot"), Some("main_verb"));
        assert_eq!(config.positions.category_of("Spillover_1"), Some("spillover_1"));
        assert_eq!(config.positions.category_of("nonsense"), None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            accuracy_threshold = 0.75
            excluded_participants = ["17", "23"]

            [models.optimizer]
            max_evaluations = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.accuracy_threshold, 0.75);
        assert_eq!(config.excluded_participants, vec!["17", "23"]);
        assert_eq!(config.rt_max_ms, 4000.0);
        assert_eq!(config.models.optimizer.max_evaluations, 500);
        assert_eq!(config.models.critical_positions.len(), 4);
    }

    #[test]
    fn test_ladder_from_toml() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            [models]
            ladder = [
                { participant = "main_effects", item = "intercept_only" },
                { participant = "intercept_only", item = "intercept_only" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(
            config.models.ladder,
            vec![
                RandomEffectsSpec::new(SlopeStructure::MainEffects, SlopeStructure::InterceptOnly),
                RandomEffectsSpec::new(SlopeStructure::InterceptOnly, SlopeStructure::InterceptOnly),
            ]
        );
    }

    #[test]
    fn test_rejects_inconsistent_values() {
        assert!(AnalysisConfig::from_toml_str("accuracy_threshold = 1.5").is_err());
        assert!(AnalysisConfig::from_toml_str("rt_min_ms = 5000.0").is_err());
        assert!(AnalysisConfig::from_toml_str("winsor_sd = 0.0").is_err());
        assert!(AnalysisConfig::from_toml_str("delimiter = \"§\"").is_err());
        assert!(AnalysisConfig::from_toml_str("delimiter = \"\\\"\"").is_err());
        assert!(AnalysisConfig::from_toml_str("delimiter = \";\"").is_ok());
        assert!(AnalysisConfig::from_toml_str(
            r#"
            [models]
            critical_positions = ["nowhere"]
            "#
        )
        .is_err());
        assert!(AnalysisConfig::from_toml_str(
            r#"
            [positions]
            order = ["a", "b"]
            aliases = { x = "c" }
            "#
        )
        .is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "winsor_sd = 3.0\ndelimiter = \"\\t\"").unwrap();

        let config = AnalysisConfig::load(file.path()).unwrap();
        assert_eq!(config.winsor_sd, 3.0);
        assert_eq!(config.delimiter, Some('\t'));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = AnalysisConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = AnalysisConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(AnalysisConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_shipped_sample_matches_defaults() {
        let sample = AnalysisConfig::from_toml_str(include_str!("../spr.example.toml")).unwrap();
        assert_eq!(sample, AnalysisConfig::default());
    }
}
