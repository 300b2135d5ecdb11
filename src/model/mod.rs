//! Mixed-effects modelling of reading times at critical positions
//!
//! For each critical position the factorial model (antecedent × verb type) is
//! fitted along its simplification ladder, followed by the antecedent-only
//! models within each verb type.
//!
//! Pipeline: observations → ModelFrame → ladder of MixedModel fits → LadderFit

pub mod design;
pub mod ladder;
pub mod lmm;
pub mod optimize;
pub mod summary;

pub use design::{Comparison, ModelFrame, RandomEffectsSpec, SlopeStructure, Term};
pub use ladder::{fit_ladder, LadderFit, Rung};
pub use lmm::{fit_model, FitDiagnostics, FitError, FixedEffect, ModelFit, VarianceComponent};
pub use optimize::NelderMeadOptions;

use crate::config::ModelConfig;
use crate::types::{Observation, VerbType};
use tracing::info;

/// Fits the configured ladders at every critical position
pub struct ModelFitter;

impl ModelFitter {
    /// Factorial and pairwise ladders for every critical position, in order
    pub fn fit_all(observations: &[Observation], config: &ModelConfig) -> Vec<LadderFit> {
        let options = config.optimizer.to_options();
        let mut results = Vec::new();

        for category in &config.critical_positions {
            let comparisons = [
                (Comparison::Factorial, &config.ladder),
                (Comparison::AntecedentWithin(VerbType::Opt), &config.pairwise_ladder),
                (Comparison::AntecedentWithin(VerbType::Ot), &config.pairwise_ladder),
            ];

            for (comparison, ladder) in comparisons {
                let frame = ModelFrame::build(observations, category, comparison);
                let result = fit_ladder(&frame, category, comparison, ladder, options);
                match result.selected_rung() {
                    Some(rung) => info!(
                        category = %category,
                        comparison = %comparison.label(),
                        n_obs = result.n_obs,
                        clean = result.selected_clean,
                        formula = %rung.formula,
                        "selected model"
                    ),
                    None => info!(
                        category = %category,
                        comparison = %comparison.label(),
                        n_obs = result.n_obs,
                        "no model could be fitted"
                    ),
                }
                results.push(result);
            }
        }

        results
    }
}
