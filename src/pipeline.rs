//! Pipeline orchestration
//!
//! This module provides the public API for SPR analysis. It runs the full
//! pipeline from delimited input to the analysis report.

use crate::accuracy::AccuracyFilter;
use crate::aggregate::{AggregateTable, Aggregator};
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::model::{LadderFit, ModelFitter};
use crate::outliers::OutlierProcessor;
use crate::plot::render_chart;
use crate::schema::{NumberedRow, RowAdapter};
use crate::types::{FilterStats, ParticipantAccuracy, TrimStats, WinsorStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, info_span};
use uuid::Uuid;

/// Everything one analysis run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    pub filter: FilterStats,
    pub accuracy: Vec<ParticipantAccuracy>,
    pub trim: TrimStats,
    pub winsor: Vec<WinsorStats>,
    pub aggregate: AggregateTable,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_path: Option<PathBuf>,
    pub models: Vec<LadderFit>,
}

impl AnalysisReport {
    pub fn excluded_participants(&self) -> Vec<&ParticipantAccuracy> {
        self.accuracy.iter().filter(|a| a.excluded).collect()
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SPR analysis {} ({})", self.run_id, self.generated_at.to_rfc3339())?;
        if let Some(input) = &self.input {
            writeln!(f, "input: {}", input)?;
        }
        writeln!(f)?;

        writeln!(
            f,
            "rows: {} read, {} kept ({} non-target, {} without RT, {} from excluded participants)",
            self.filter.input_rows,
            self.filter.kept_rows,
            self.filter.non_target_rows,
            self.filter.missing_rt_rows,
            self.filter.excluded_participant_rows
        )?;
        for a in self.excluded_participants() {
            let acc = a
                .accuracy
                .map(|v| format!("{:.1}%", v * 100.0))
                .unwrap_or_else(|| "NA".to_string());
            writeln!(f, "  excluded {} (accuracy {}, {:?})", a.participant, acc, a.reason)?;
        }
        writeln!(
            f,
            "hard trim: {} kept, {} too fast, {} too slow",
            self.trim.kept, self.trim.dropped_low, self.trim.dropped_high
        )?;
        let clamped: usize = self.winsor.iter().map(|w| w.clamped).sum();
        writeln!(f, "winsorized: {} values across {} positions", clamped, self.winsor.len())?;
        if let Some(path) = &self.chart_path {
            writeln!(f, "chart: {}", path.display())?;
        }
        writeln!(f)?;

        write!(f, "{}", self.aggregate.to_text())?;

        for ladder in &self.models {
            writeln!(f)?;
            write!(f, "{}", ladder)?;
        }
        Ok(())
    }
}

/// Run the full analysis on one input file.
///
/// # Arguments
/// * `path` - Delimited input file (comma, or tab for `.tsv`/`.txt`)
/// * `config` - Analysis configuration
///
/// # Returns
/// The analysis report; the chart is written to `config.chart.path`
///
/// # Example
/// ```ignore
/// let report = analyze_file(Path::new("spr_data.csv"), &AnalysisConfig::default())?;
/// println!("{}", report);
/// ```
pub fn analyze_file(path: &Path, config: &AnalysisConfig) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;
    let rows = RowAdapter::parse_path(path, config.delimiter)?;
    AnalysisProcessor::new(config.clone())
        .with_input_name(path.display().to_string())
        .run(&rows)
}

/// Stage processor holding the configuration and which outputs to produce.
pub struct AnalysisProcessor {
    config: AnalysisConfig,
    input: Option<String>,
    fit_models: bool,
    render_chart: bool,
}

impl AnalysisProcessor {
    /// Create a processor that fits models and renders the chart
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            input: None,
            fit_models: true,
            render_chart: true,
        }
    }

    pub fn with_input_name(mut self, name: impl Into<String>) -> Self {
        self.input = Some(name.into());
        self
    }

    pub fn with_models(mut self, enabled: bool) -> Self {
        self.fit_models = enabled;
        self
    }

    pub fn with_chart(mut self, enabled: bool) -> Self {
        self.render_chart = enabled;
        self
    }

    /// Read rows from a stream using the configured delimiter (comma by default)
    pub fn read_rows<R: Read>(&self, reader: R) -> Result<Vec<NumberedRow>, AnalysisError> {
        RowAdapter::parse_reader(reader, RowAdapter::delimiter_for(None, self.config.delimiter))
    }

    /// Run every stage on already-read rows.
    ///
    /// Pipeline stages:
    /// 1. RowAdapter - Type and validate rows
    /// 2. AccuracyFilter - Exclude participants, keep target reading times
    /// 3. OutlierProcessor - Hard trim, then per-position winsorization
    /// 4. Aggregator - Mean and SE per condition × position, chart
    /// 5. ModelFitter - Mixed-model ladders at critical positions
    pub fn run(&self, rows: &[NumberedRow]) -> Result<AnalysisReport, AnalysisError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("analysis", run_id = %run_id);
        let _guard = span.enter();

        self.config.validate()?;
        let dataset = RowAdapter::to_dataset(rows, &self.config.positions)?;
        info!(rows = dataset.rows.len(), answers = dataset.answers.len(), "input loaded");

        let filtered = AccuracyFilter::apply(&dataset, &self.config)?;
        if filtered.observations.is_empty() {
            return Err(AnalysisError::EmptyDataset(
                "no target reading times left after the accuracy filter".to_string(),
            ));
        }

        let cleaned = OutlierProcessor::process(filtered.observations, &self.config);
        if cleaned.observations.is_empty() {
            return Err(AnalysisError::EmptyDataset(
                "no reading times left after the hard trim".to_string(),
            ));
        }

        let aggregate = Aggregator::aggregate(&cleaned.observations, &self.config.positions);

        let chart_path = if self.render_chart {
            render_chart(&aggregate, &self.config.chart)?;
            Some(self.config.chart.path.clone())
        } else {
            None
        };

        let models = if self.fit_models {
            ModelFitter::fit_all(&cleaned.observations, &self.config.models)
        } else {
            Vec::new()
        };

        info!(
            observations = cleaned.observations.len(),
            models = models.len(),
            "analysis complete"
        );

        Ok(AnalysisReport {
            run_id,
            generated_at: Utc::now(),
            version: crate::VERSION.to_string(),
            input: self.input.clone(),
            filter: filtered.stats,
            accuracy: filtered.accuracy,
            trim: cleaned.trim,
            winsor: cleaned.winsor,
            aggregate,
            chart_path,
            models,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Comparison, RandomEffectsSpec, SlopeStructure, Term};
    use crate::types::{Condition, ExclusionReason};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::fmt::Write as _;

    const HEADER: &str =
        "Participant,List,ParticipantId,ItemType,ItemNumber,Condition,WordPosition,Word,Answer,RT,Antecedent,VerbType";

    /// 12 participants × 8 items in a Latin square, plus fillers with answers
    fn synthetic_csv(seed: u64) -> String {
        let mut rng = StdRng::seed_from_u64(seed);
        let conditions = [
            Condition::OptAnt,
            Condition::OptNoAnt,
            Condition::OtAnt,
            Condition::OtNoAnt,
        ];
        let mut out = String::from(HEADER);
        out.push('\n');

        for p in 0..12u32 {
            let pid = format!("P{:02}", p);
            let speed: f64 = rng.gen_range(-40.0..40.0);
            for item in 0..8u32 {
                let condition = conditions[((p + item) % 4) as usize];
                let (ant, verb) = (
                    condition.antecedent().map(|a| a.as_str()).unwrap_or(""),
                    condition.verb_type().map(|v| v.as_str()).unwrap_or(""),
                );
                for (label, base) in [("pronoun", 360.0), ("verb_opt", 420.0), ("spillover_1", 390.0)] {
                    let label = if label == "verb_opt" && condition.verb_type().map(|v| v.as_str()) == Some("OT") {
                        "verb_ot"
                    } else {
                        label
                    };
                    let effect = if label.starts_with("verb") {
                        25.0 * condition.antecedent().map(|a| a.code()).unwrap_or(0.0)
                    } else {
                        0.0
                    };
                    let rt = base + speed + effect + rng.gen_range(-30.0..30.0);
                    let _ = writeln!(
                        out,
                        "{p},1,{pid},target,{item},{cond},{label},w,,{rt:.1},{ant},{verb}",
                        cond = condition.as_str()
                    );
                }
            }
            // P11 answers poorly
            for filler in 0..10u32 {
                let correct = if p == 11 { filler < 6 } else { filler < 9 };
                let _ = writeln!(
                    out,
                    "{p},1,{pid},filler,{n},Control,final,?,{a},,,",
                    n = 100 + filler,
                    a = if correct { 1 } else { 0 }
                );
            }
        }
        // one very slow and one implausibly fast reading
        let _ = writeln!(out, "0,1,P00,target,0,OPT-Ant,pronoun,w,,5200,Ant,OPT");
        let _ = writeln!(out, "0,1,P00,target,0,OPT-Ant,pronoun,w,,80,Ant,OPT");
        out
    }

    fn fast_config(dir: &Path) -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.models.critical_positions = vec!["main_verb".to_string()];
        config.models.ladder = vec![RandomEffectsSpec::new(
            SlopeStructure::InterceptOnly,
            SlopeStructure::InterceptOnly,
        )];
        config.models.pairwise_ladder = config.models.ladder.clone();
        config.chart.path = dir.join("rt.svg");
        config
    }

    #[test]
    fn test_full_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path());
        let processor = AnalysisProcessor::new(config);
        let rows = processor.read_rows(synthetic_csv(7).as_bytes()).unwrap();

        let report = processor.run(&rows).unwrap();

        let excluded: Vec<(&str, Option<ExclusionReason>)> = report
            .excluded_participants()
            .iter()
            .map(|a| (a.participant.as_str(), a.reason))
            .collect();
        assert_eq!(excluded, vec![("P11", Some(ExclusionReason::LowAccuracy))]);

        assert_eq!(report.filter.kept_rows, 11 * 8 * 3 + 2);
        assert_eq!(report.trim.dropped_high, 1);
        assert_eq!(report.trim.dropped_low, 1);
        assert!(dir.path().join("rt.svg").exists());

        // verb_opt and verb_ot collapse onto one axis category
        assert!(report.aggregate.get(Condition::OtAnt, "main_verb").unwrap().stats.is_some());
        assert!(report.aggregate.get(Condition::OtAnt, "final").unwrap().stats.is_none());

        assert_eq!(report.models.len(), 3);
        let factorial = &report.models[0];
        assert_eq!(factorial.comparison, Comparison::Factorial);
        assert_eq!(factorial.n_obs, 88);
        let fit = factorial.selected_fit().unwrap();
        let antecedent = fit.fixed(Term::Antecedent).unwrap();
        assert!((antecedent.estimate - 25.0).abs() < 10.0);
        assert!(antecedent.p_value < 0.05);
    }

    #[test]
    fn test_excluded_participant_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let processor = AnalysisProcessor::new(fast_config(dir.path())).with_chart(false);
        let rows = processor.read_rows(synthetic_csv(5).as_bytes()).unwrap();
        let report = processor.run(&rows).unwrap();

        // P11's 24 target rows are dropped by the filter, not later
        assert_eq!(report.filter.excluded_participant_rows, 24 + 10);
        let cell_rows: usize = report
            .aggregate
            .cells
            .iter()
            .filter_map(|c| c.stats)
            .map(|s| s.n)
            .sum();
        assert_eq!(cell_rows, report.trim.kept);
        assert_eq!(report.trim.input, 11 * 8 * 3 + 2);

        for ladder in &report.models {
            assert_eq!(ladder.n_participants, 11);
        }
        assert_eq!(report.models[0].n_obs, 11 * 8);
        assert_eq!(report.models[1].n_obs + report.models[2].n_obs, 11 * 8);
    }

    #[test]
    fn test_target_question_rows_are_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = synthetic_csv(9);
        // a comprehension question after every target item of P00-P03
        for p in 0..4u32 {
            for item in 0..8u32 {
                let _ = writeln!(csv, "{p},1,P{p:02},target,{item},OPT-Ant,question,?,1,,Ant,OPT");
            }
        }
        let processor = AnalysisProcessor::new(fast_config(dir.path()))
            .with_models(false)
            .with_chart(false);
        let rows = processor.read_rows(csv.as_bytes()).unwrap();

        let report = processor.run(&rows).unwrap();

        assert_eq!(report.filter.missing_rt_rows, 32);
        assert_eq!(report.filter.kept_rows, 11 * 8 * 3 + 2);
        // target answers never count towards accuracy
        let excluded: Vec<&str> = report
            .excluded_participants()
            .iter()
            .map(|a| a.participant.as_str())
            .collect();
        assert_eq!(excluded, vec!["P11"]);
        assert_eq!(report.accuracy[0].answered, 10);
    }

    #[test]
    fn test_invalid_delimiter_rejected_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data.csv");
        std::fs::write(&input, synthetic_csv(2)).unwrap();
        let mut config = fast_config(dir.path());
        config.delimiter = Some('§');

        let err = analyze_file(&input, &config).unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[test]
    fn test_report_serializes() {
        let dir = tempfile::tempdir().unwrap();
        let processor = AnalysisProcessor::new(fast_config(dir.path()))
            .with_models(false)
            .with_chart(false)
            .with_input_name("synthetic");
        let rows = processor.read_rows(synthetic_csv(3).as_bytes()).unwrap();
        let report = processor.run(&rows).unwrap();

        assert!(report.models.is_empty());
        assert_eq!(report.chart_path, None);
        assert!(!dir.path().join("rt.svg").exists());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["input"], "synthetic");
        assert_eq!(json["aggregate"]["cells"][0]["condition"], "OPT-Ant");

        let text = report.to_string();
        assert!(text.contains("excluded P11"));
        assert!(text.contains("hard trim"));
    }

    #[test]
    fn test_all_rows_trimmed_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fast_config(dir.path());
        config.rt_min_ms = 3000.0;
        let processor = AnalysisProcessor::new(config).with_models(false).with_chart(false);
        let rows = processor.read_rows(synthetic_csv(1).as_bytes()).unwrap();

        let err = processor.run(&rows).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyDataset(_)));
    }

    #[test]
    fn test_analyze_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data.csv");
        std::fs::write(&input, synthetic_csv(11)).unwrap();

        let mut config = fast_config(dir.path());
        config.models.critical_positions.clear();
        let report = analyze_file(&input, &config).unwrap();

        assert_eq!(report.input.as_deref(), Some(input.display().to_string().as_str()));
        assert!(report.models.is_empty());
        assert_eq!(report.winsor.len(), 3);
    }
}
