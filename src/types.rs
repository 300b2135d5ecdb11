//! Core types for the SPR analysis pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: observations, comprehension answers, participant accuracy, stage
//! statistics and the aggregate table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Antecedent availability factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Antecedent {
    Present,
    Absent,
}

impl Antecedent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Antecedent::Present => "Ant",
            Antecedent::Absent => "NoAnt",
        }
    }

    /// Sum-coded contrast value (present = +1, absent = -1)
    pub fn code(&self) -> f64 {
        match self {
            Antecedent::Present => 1.0,
            Antecedent::Absent => -1.0,
        }
    }

    /// Parse an `Antecedent` column value
    pub fn parse(label: &str) -> Option<Self> {
        match normalize_label(label).as_str() {
            "ant" | "antecedent" | "present" | "yes" => Some(Antecedent::Present),
            "noant" | "noantecedent" | "absent" | "no" => Some(Antecedent::Absent),
            _ => None,
        }
    }
}

/// Verb transitivity factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerbType {
    /// Optionally-transitive verb
    Opt,
    /// Obligatorily-transitive verb
    Ot,
}

impl VerbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerbType::Opt => "OPT",
            VerbType::Ot => "OT",
        }
    }

    /// Sum-coded contrast value (OPT = +1, OT = -1)
    pub fn code(&self) -> f64 {
        match self {
            VerbType::Opt => 1.0,
            VerbType::Ot => -1.0,
        }
    }

    /// Parse a `VerbType` column value
    pub fn parse(label: &str) -> Option<Self> {
        match normalize_label(label).as_str() {
            "opt" => Some(VerbType::Opt),
            "ot" => Some(VerbType::Ot),
            _ => None,
        }
    }
}

/// Experimental condition: antecedent × verb type, plus one control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "OPT-Ant")]
    OptAnt,
    #[serde(rename = "OPT-NoAnt")]
    OptNoAnt,
    #[serde(rename = "OT-Ant")]
    OtAnt,
    #[serde(rename = "OT-NoAnt")]
    OtNoAnt,
    /// Intransitive control without a transitive counterpart
    #[serde(rename = "Control")]
    Control,
}

impl Condition {
    /// All conditions in plotting/report order
    pub const ALL: [Condition; 5] = [
        Condition::OptAnt,
        Condition::OptNoAnt,
        Condition::OtAnt,
        Condition::OtNoAnt,
        Condition::Control,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::OptAnt => "OPT-Ant",
            Condition::OptNoAnt => "OPT-NoAnt",
            Condition::OtAnt => "OT-Ant",
            Condition::OtNoAnt => "OT-NoAnt",
            Condition::Control => "Control",
        }
    }

    /// Parse a condition label, ignoring case, `-`, `_` and spaces
    pub fn parse(label: &str) -> Option<Self> {
        match normalize_label(label).as_str() {
            "optant" => Some(Condition::OptAnt),
            "optnoant" => Some(Condition::OptNoAnt),
            "otant" => Some(Condition::OtAnt),
            "otnoant" => Some(Condition::OtNoAnt),
            "control" => Some(Condition::Control),
            _ => None,
        }
    }

    pub fn antecedent(&self) -> Option<Antecedent> {
        match self {
            Condition::OptAnt | Condition::OtAnt => Some(Antecedent::Present),
            Condition::OptNoAnt | Condition::OtNoAnt => Some(Antecedent::Absent),
            Condition::Control => None,
        }
    }

    pub fn verb_type(&self) -> Option<VerbType> {
        match self {
            Condition::OptAnt | Condition::OptNoAnt => Some(VerbType::Opt),
            Condition::OtAnt | Condition::OtNoAnt => Some(VerbType::Ot),
            Condition::Control => None,
        }
    }

    /// Whether the condition belongs to the 2×2 factorial design
    pub fn is_factorial(&self) -> bool {
        !matches!(self, Condition::Control)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Item type of a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Target,
    Filler,
    Practice,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Target => "target",
            ItemType::Filler => "filler",
            ItemType::Practice => "practice",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match normalize_label(label).as_str() {
            "target" | "experimental" => Some(ItemType::Target),
            "filler" => Some(ItemType::Filler),
            "practice" => Some(ItemType::Practice),
            _ => None,
        }
    }
}

/// One reading-time observation: (participant, item, word position)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Participant identifier
    pub participant: String,
    /// Counterbalancing list
    pub list: String,
    /// Item number
    pub item: u32,
    /// Experimental condition
    pub condition: Condition,
    /// Word-position label as it appears in the input
    pub position_label: String,
    /// Word-position category the label maps to
    pub category: String,
    /// Word text
    pub word: String,
    /// Reading time in milliseconds (after any winsorization)
    pub rt_ms: f64,
    /// Reading time as loaded
    pub raw_rt_ms: f64,
    /// Whether `rt_ms` was clamped by winsorization
    #[serde(default)]
    pub winsorized: bool,
}

impl Observation {
    pub fn antecedent(&self) -> Option<Antecedent> {
        self.condition.antecedent()
    }

    pub fn verb_type(&self) -> Option<VerbType> {
        self.condition.verb_type()
    }
}

/// One comprehension-question answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComprehensionAnswer {
    pub participant: String,
    pub item_type: ItemType,
    pub item: u32,
    pub correct: bool,
}

/// Why a participant was excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Filler accuracy below the threshold
    LowAccuracy,
    /// Listed explicitly in the configuration
    ExplicitList,
}

/// Filler-question accuracy of one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantAccuracy {
    pub participant: String,
    /// Mean accuracy over answered filler questions (None when none answered)
    pub accuracy: Option<f64>,
    /// Number of answered filler questions
    pub answered: usize,
    pub excluded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ExclusionReason>,
}

/// Statistics of the accuracy/target filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub input_rows: usize,
    pub kept_rows: usize,
    pub non_target_rows: usize,
    pub missing_rt_rows: usize,
    pub excluded_participant_rows: usize,
}

/// Statistics of the hard trim pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrimStats {
    pub input: usize,
    pub kept: usize,
    pub dropped_low: usize,
    pub dropped_high: usize,
}

/// Winsorization statistics of one position category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinsorStats {
    pub category: String,
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation (None with fewer than two rows)
    pub sd: Option<f64>,
    /// Upper cap mean + k·SD (None with fewer than two rows)
    pub cap: Option<f64>,
    pub clamped: usize,
}

/// Mean, standard error and count of one aggregate bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellStats {
    pub mean_rt: f64,
    pub se: f64,
    pub n: usize,
}

/// One (condition, position) entry of the aggregate table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCell {
    pub condition: Condition,
    pub category: String,
    /// None when the combination has no observations
    pub stats: Option<CellStats>,
}

/// Lowercase and strip separators so `OPT-NoAnt`, `opt_noant`, `Opt NoAnt` match
pub(crate) fn normalize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_parse_variants() {
        assert_eq!(Condition::parse("OPT-Ant"), Some(Condition::OptAnt));
        assert_eq!(Condition::parse("opt_noant"), Some(Condition::OptNoAnt));
        assert_eq!(Condition::parse("OT NoAnt"), Some(Condition::OtNoAnt));
        assert_eq!(Condition::parse(" control "), Some(Condition::Control));
        assert_eq!(Condition::parse("OPT"), None);
    }

    #[test]
    fn test_condition_factors() {
        assert_eq!(Condition::OtAnt.antecedent(), Some(Antecedent::Present));
        assert_eq!(Condition::OtAnt.verb_type(), Some(VerbType::Ot));
        assert_eq!(Condition::OptNoAnt.antecedent(), Some(Antecedent::Absent));
        assert_eq!(Condition::Control.antecedent(), None);
        assert!(!Condition::Control.is_factorial());
    }

    #[test]
    fn test_sum_coding() {
        assert_eq!(Antecedent::Present.code(), 1.0);
        assert_eq!(Antecedent::Absent.code(), -1.0);
        assert_eq!(VerbType::Opt.code(), 1.0);
        assert_eq!(VerbType::Ot.code(), -1.0);
    }

    #[test]
    fn test_condition_serializes_as_label() {
        let json = serde_json::to_string(&Condition::OptNoAnt).unwrap();
        assert_eq!(json, "\"OPT-NoAnt\"");
    }
}
