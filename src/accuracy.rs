//! Participant exclusion by comprehension accuracy
//!
//! Accuracy is the proportion of correctly answered filler questions. A
//! participant is dropped when it falls below the threshold or when listed
//! explicitly. Only target rows with a reading time survive the filter.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::schema::Dataset;
use crate::types::{ExclusionReason, FilterStats, ItemType, Observation, ParticipantAccuracy};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

/// Result of the accuracy filter
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutput {
    pub observations: Vec<Observation>,
    /// One entry per participant, ordered by id
    pub accuracy: Vec<ParticipantAccuracy>,
    pub stats: FilterStats,
}

/// Applies the accuracy threshold and the explicit exclusion list
pub struct AccuracyFilter;

impl AccuracyFilter {
    /// Filler accuracy per participant, for every participant in the dataset
    pub fn participant_accuracy(dataset: &Dataset) -> BTreeMap<String, (usize, usize)> {
        let mut tally: BTreeMap<String, (usize, usize)> = dataset
            .rows
            .iter()
            .map(|r| (r.participant.clone(), (0, 0)))
            .collect();

        for answer in dataset.answers.iter().filter(|a| a.item_type == ItemType::Filler) {
            let entry = tally.entry(answer.participant.clone()).or_insert((0, 0));
            entry.1 += 1;
            if answer.correct {
                entry.0 += 1;
            }
        }
        tally
    }

    /// Exclude participants and keep target rows with a reading time
    pub fn apply(dataset: &Dataset, config: &AnalysisConfig) -> Result<FilterOutput, AnalysisError> {
        if dataset.is_empty() {
            return Err(AnalysisError::EmptyDataset("input has no rows".to_string()));
        }

        let explicit: HashSet<&str> = config
            .excluded_participants
            .iter()
            .map(|s| s.trim())
            .collect();

        let mut accuracy = Vec::new();
        let mut excluded = HashSet::new();
        for (participant, (correct, answered)) in Self::participant_accuracy(dataset) {
            let acc = (answered > 0).then(|| correct as f64 / answered as f64);
            let reason = if explicit.contains(participant.as_str()) {
                Some(ExclusionReason::ExplicitList)
            } else if acc.is_some_and(|a| a < config.accuracy_threshold) {
                Some(ExclusionReason::LowAccuracy)
            } else {
                None
            };

            if acc.is_none() {
                warn!(participant = %participant, "no filler answers; accuracy undefined, keeping participant");
            }
            if reason.is_some() {
                warn!(participant = %participant, accuracy = ?acc, ?reason, "excluding participant");
                excluded.insert(participant.clone());
            }

            accuracy.push(ParticipantAccuracy {
                participant,
                accuracy: acc,
                answered,
                excluded: reason.is_some(),
                reason,
            });
        }

        let mut stats = FilterStats {
            input_rows: dataset.rows.len(),
            ..FilterStats::default()
        };
        let mut observations = Vec::new();

        for row in &dataset.rows {
            if excluded.contains(&row.participant) {
                stats.excluded_participant_rows += 1;
                continue;
            }
            if row.item_type != ItemType::Target {
                stats.non_target_rows += 1;
                continue;
            }
            let (Some(rt), Some(category)) = (row.rt_ms, row.category.as_ref()) else {
                stats.missing_rt_rows += 1;
                continue;
            };
            observations.push(Observation {
                participant: row.participant.clone(),
                list: row.list.clone(),
                item: row.item,
                condition: row.condition,
                position_label: row.position_label.clone(),
                category: category.clone(),
                word: row.word.clone(),
                rt_ms: rt,
                raw_rt_ms: rt,
                winsorized: false,
            });
        }
        stats.kept_rows = observations.len();

        info!(
            input = stats.input_rows,
            kept = stats.kept_rows,
            excluded_participants = excluded.len(),
            "accuracy filter applied"
        );

        Ok(FilterOutput {
            observations,
            accuracy,
            stats,
        })
    }
}
