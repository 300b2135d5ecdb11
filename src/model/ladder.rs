//! Model-simplification ladder
//!
//! A ladder is an ordered list of random-effect specifications. Every rung is
//! fitted and kept for inspection; the first rung that converges without a
//! singular fit is selected. When no rung qualifies, the last fitted rung is
//! selected and flagged.

use crate::model::design::{Comparison, ModelFrame, RandomEffectsSpec, Term};
use crate::model::lmm::{fit_model, ModelFit};
use crate::model::optimize::NelderMeadOptions;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Outcome of one rung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rung {
    pub spec: RandomEffectsSpec,
    pub formula: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<ModelFit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All rungs of one (position, comparison) model and the selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderFit {
    pub category: String,
    pub comparison: Comparison,
    pub n_obs: usize,
    pub n_participants: usize,
    pub n_items: usize,
    pub rungs: Vec<Rung>,
    /// Index into `rungs` of the selected model
    pub selected: Option<usize>,
    /// Whether the selected rung converged without a singular fit
    pub selected_clean: bool,
}

impl LadderFit {
    pub fn selected_rung(&self) -> Option<&Rung> {
        self.selected.and_then(|i| self.rungs.get(i))
    }

    pub fn selected_fit(&self) -> Option<&ModelFit> {
        self.selected_rung().and_then(|r| r.fit.as_ref())
    }
}

/// Drop rungs whose random terms coincide once restricted to the fixed part
pub fn distinct_rungs(ladder: &[RandomEffectsSpec], fixed: &[Term]) -> Vec<RandomEffectsSpec> {
    let mut seen: Vec<(Vec<Term>, Vec<Term>)> = Vec::new();
    let mut out = Vec::new();
    for spec in ladder {
        let terms = spec.random_terms(fixed);
        if !seen.contains(&terms) {
            seen.push(terms);
            out.push(*spec);
        }
    }
    out
}

/// Fit every rung of `ladder` on one frame and select a model
pub fn fit_ladder(
    frame: &ModelFrame,
    category: &str,
    comparison: Comparison,
    ladder: &[RandomEffectsSpec],
    options: NelderMeadOptions,
) -> LadderFit {
    let fixed = comparison.fixed_terms();
    let mut rungs = Vec::new();

    for spec in distinct_rungs(ladder, fixed) {
        let formula = spec.formula(fixed);
        debug!(category, comparison = %comparison.label(), %formula, "fitting rung");
        match fit_model(frame, fixed, spec, options) {
            Ok(fit) => {
                for w in &fit.diagnostics.warnings {
                    warn!(category, %formula, "{}", w);
                }
                rungs.push(Rung {
                    spec,
                    formula,
                    fit: Some(fit),
                    error: None,
                });
            }
            Err(e) => {
                warn!(category, %formula, error = %e, "rung could not be fitted");
                rungs.push(Rung {
                    spec,
                    formula,
                    fit: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let clean = rungs
        .iter()
        .position(|r| r.fit.as_ref().is_some_and(|f| f.diagnostics.is_clean()));
    let selected = clean.or_else(|| rungs.iter().rposition(|r| r.fit.is_some()));

    LadderFit {
        category: category.to_string(),
        comparison,
        n_obs: frame.len(),
        n_participants: frame.n_participants(),
        n_items: frame.n_items(),
        rungs,
        selected,
        selected_clean: clean.is_some(),
    }
}
