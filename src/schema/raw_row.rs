//! Raw input row definition
//!
//! One row per (participant, item, word position) as exported by the
//! presentation software. Every field is read as text; typing and
//! consistency checks happen in [`RawRow::validate`].

use crate::config::PositionScheme;
use crate::types::{Antecedent, Condition, ItemType, VerbType};
use serde::{Deserialize, Serialize};

/// Expected input columns, in export order
pub const COLUMNS: [&str; 12] = [
    "Participant",
    "List",
    "ParticipantId",
    "ItemType",
    "ItemNumber",
    "Condition",
    "WordPosition",
    "Word",
    "Answer",
    "RT",
    "Antecedent",
    "VerbType",
];

/// Columns without which no row can be interpreted
pub const REQUIRED_COLUMNS: [&str; 5] = ["ItemType", "ItemNumber", "Condition", "WordPosition", "RT"];

/// One record of the delimited input file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    #[serde(rename = "Participant", default)]
    pub participant: String,
    #[serde(rename = "List", default)]
    pub list: String,
    #[serde(rename = "ParticipantId", default)]
    pub participant_id: String,
    #[serde(rename = "ItemType")]
    pub item_type: String,
    #[serde(rename = "ItemNumber")]
    pub item_number: String,
    #[serde(rename = "Condition")]
    pub condition: String,
    #[serde(rename = "WordPosition")]
    pub word_position: String,
    #[serde(rename = "Word", default)]
    pub word: String,
    #[serde(rename = "Answer", default)]
    pub answer: String,
    #[serde(rename = "RT")]
    pub rt: String,
    #[serde(rename = "Antecedent", default)]
    pub antecedent: String,
    #[serde(rename = "VerbType", default)]
    pub verb_type: String,
}

/// Typed view of a valid row
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub participant: String,
    pub list: String,
    pub item_type: ItemType,
    pub item: u32,
    pub condition: Condition,
    pub position_label: String,
    /// Category of `position_label` (None for unknown labels on non-target or RT-less rows)
    pub category: Option<String>,
    pub word: String,
    pub answer: Option<bool>,
    pub rt_ms: Option<f64>,
}

impl RawRow {
    /// Participant identifier: `ParticipantId`, falling back to `Participant`
    pub fn participant_key(&self) -> &str {
        let id = self.participant_id.trim();
        if id.is_empty() {
            self.participant.trim()
        } else {
            id
        }
    }

    /// Whether the row carries a reading time
    pub fn is_timed(&self) -> bool {
        !is_missing(&self.rt)
    }

    /// Check and type every field
    pub fn parse(&self, positions: &PositionScheme) -> Result<ParsedRow, RowError> {
        let participant = self.participant_key();
        if participant.is_empty() {
            return Err(RowError::MissingParticipant);
        }

        let item_type =
            ItemType::parse(&self.item_type).ok_or_else(|| RowError::InvalidItemType(self.item_type.clone()))?;

        let item = self
            .item_number
            .trim()
            .parse::<u32>()
            .map_err(|_| RowError::InvalidItemNumber(self.item_number.clone()))?;

        let condition =
            Condition::parse(&self.condition).ok_or_else(|| RowError::InvalidCondition(self.condition.clone()))?;

        let rt_ms = parse_rt(&self.rt)?;
        let answer = parse_answer(&self.answer)?;

        let label = self.word_position.trim();
        let category = positions.category_of(label).map(str::to_string);

        if item_type == ItemType::Target {
            // question rows carry no RT and need no category
            if category.is_none() && rt_ms.is_some() {
                return Err(RowError::UnknownPosition(label.to_string()));
            }
            self.check_factors(condition)?;
        }

        Ok(ParsedRow {
            participant: participant.to_string(),
            list: self.list.trim().to_string(),
            item_type,
            item,
            condition,
            position_label: label.to_string(),
            category,
            word: self.word.trim().to_string(),
            answer,
            rt_ms,
        })
    }

    /// Check without keeping the typed row
    pub fn validate(&self, positions: &PositionScheme) -> Result<(), RowError> {
        self.parse(positions).map(|_| ())
    }

    fn check_factors(&self, condition: Condition) -> Result<(), RowError> {
        // control rows carry free-form factor columns
        if !condition.is_factorial() {
            return Ok(());
        }
        let antecedent = self.antecedent.trim();
        if !is_missing(antecedent) && Antecedent::parse(antecedent) != condition.antecedent() {
            return Err(RowError::FactorMismatch {
                column: "Antecedent",
                value: antecedent.to_string(),
                condition: condition.as_str(),
            });
        }
        let verb_type = self.verb_type.trim();
        if !is_missing(verb_type) && VerbType::parse(verb_type) != condition.verb_type() {
            return Err(RowError::FactorMismatch {
                column: "VerbType",
                value: verb_type.to_string(),
                condition: condition.as_str(),
            });
        }
        Ok(())
    }
}

fn is_missing(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("na") || v.eq_ignore_ascii_case("nan")
}

fn parse_rt(value: &str) -> Result<Option<f64>, RowError> {
    if is_missing(value) {
        return Ok(None);
    }
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(RowError::InvalidRt(value.to_string())),
    }
}

fn parse_answer(value: &str) -> Result<Option<bool>, RowError> {
    if is_missing(value) {
        return Ok(None);
    }
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "correct" => Ok(Some(true)),
        "0" | "0.0" | "false" | "incorrect" => Ok(Some(false)),
        _ => Err(RowError::InvalidAnswer(value.to_string())),
    }
}

/// Validation errors for raw rows
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowError {
    #[error("missing participant id")]
    MissingParticipant,

    #[error("invalid item type '{0}' (expected target, filler or practice)")]
    InvalidItemType(String),

    #[error("invalid item number '{0}'")]
    InvalidItemNumber(String),

    #[error("invalid condition '{0}'")]
    InvalidCondition(String),

    #[error("invalid RT '{0}'")]
    InvalidRt(String),

    #[error("invalid answer '{0}'")]
    InvalidAnswer(String),

    #[error("unknown word position '{0}'")]
    UnknownPosition(String),

    #[error("{column} '{value}' contradicts condition {condition}")]
    FactorMismatch {
        column: &'static str,
        value: String,
        condition: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target_row() -> RawRow {
        RawRow {
            participant: "3".to_string(),
            list: "2".to_string(),
            participant_id: "P03".to_string(),
            item_type: "target".to_string(),
            item_number: "12".to_string(),
            condition: "OT-NoAnt".to_string(),
            word_position: "verb_ot".to_string(),
            word: "insisted".to_string(),
            answer: "NA".to_string(),
            rt: "412.5".to_string(),
            antecedent: "NoAnt".to_string(),
            verb_type: "OT".to_string(),
        }
    }

    #[test]
    fn test_parse_target_row() {
        let parsed = target_row().parse(&PositionScheme::default()).unwrap();
        assert_eq!(parsed.participant, "P03");
        assert_eq!(parsed.item, 12);
        assert_eq!(parsed.condition, Condition::OtNoAnt);
        assert_eq!(parsed.category.as_deref(), Some("main_verb"));
        assert_eq!(parsed.rt_ms, Some(412.5));
        assert_eq!(parsed.answer, None);
    }

    #[test]
    fn test_participant_falls_back_to_participant_column() {
        let mut row = target_row();
        row.participant_id = " ".to_string();
        assert_eq!(row.participant_key(), "3");
        row.participant = String::new();
        assert_eq!(
            row.validate(&PositionScheme::default()),
            Err(RowError::MissingParticipant)
        );
    }

    #[test]
    fn test_answer_and_rt_forms() {
        assert_eq!(parse_answer("correct"), Ok(Some(true)));
        assert_eq!(parse_answer("0"), Ok(Some(false)));
        assert_eq!(parse_answer(""), Ok(None));
        assert!(parse_answer("maybe").is_err());
        assert_eq!(parse_rt("NA"), Ok(None));
        assert!(parse_rt("fast").is_err());
        assert!(parse_rt("inf").is_err());
    }

    #[test]
    fn test_rejects_contradicting_factor_columns() {
        let mut row = target_row();
        row.verb_type = "OPT".to_string();
        let err = row.validate(&PositionScheme::default()).unwrap_err();
        assert!(matches!(err, RowError::FactorMismatch { column: "VerbType", .. }));
    }

    #[test]
    fn test_unknown_position_only_matters_on_timed_targets() {
        let mut row = target_row();
        row.word_position = "question".to_string();
        assert_eq!(
            row.validate(&PositionScheme::default()),
            Err(RowError::UnknownPosition("question".to_string()))
        );

        row.rt = "NA".to_string();
        row.answer = "1".to_string();
        assert!(!row.is_timed());
        let question = row.parse(&PositionScheme::default()).unwrap();
        assert_eq!(question.category, None);
        assert_eq!(question.rt_ms, None);
        assert_eq!(question.answer, Some(true));

        row.item_type = "filler".to_string();
        row.rt = String::new();
        row.answer = "1".to_string();
        let parsed = row.parse(&PositionScheme::default()).unwrap();
        assert_eq!(parsed.category, None);
        assert_eq!(parsed.answer, Some(true));
    }
}
