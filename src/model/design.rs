//! Model terms, random-effect structures and the model frame
//!
//! A model frame holds the response, the full sum-coded term vector for every
//! row, and the participant/item grouping indices. Fixed and random parts pick
//! the terms they need from the same term vector.

use crate::types::{Condition, Observation, VerbType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A regression term built from the two sum-coded factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    Intercept,
    Antecedent,
    VerbType,
    Interaction,
}

impl Term {
    /// Term order inside a frame row
    pub const ALL: [Term; 4] = [
        Term::Intercept,
        Term::Antecedent,
        Term::VerbType,
        Term::Interaction,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Term::Intercept => "(Intercept)",
            Term::Antecedent => "antecedent",
            Term::VerbType => "verb_type",
            Term::Interaction => "antecedent:verb_type",
        }
    }

    /// Column of this term inside a frame row
    pub fn index(&self) -> usize {
        match self {
            Term::Intercept => 0,
            Term::Antecedent => 1,
            Term::VerbType => 2,
            Term::Interaction => 3,
        }
    }
}

/// Random-slope structure for one grouping factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeStructure {
    /// Correlated intercept + both main effects + interaction
    Interaction,
    /// Correlated intercept + both main effects
    MainEffects,
    /// Intercept only
    InterceptOnly,
}

impl SlopeStructure {
    pub fn terms(&self) -> &'static [Term] {
        match self {
            SlopeStructure::Interaction => &Term::ALL,
            SlopeStructure::MainEffects => &[Term::Intercept, Term::Antecedent, Term::VerbType],
            SlopeStructure::InterceptOnly => &[Term::Intercept],
        }
    }

    /// Terms of this structure that also appear in the fixed part
    pub fn restricted_to(&self, fixed: &[Term]) -> Vec<Term> {
        self.terms()
            .iter()
            .copied()
            .filter(|t| fixed.contains(t))
            .collect()
    }
}

/// Random-effect specification: one slope structure per grouping factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RandomEffectsSpec {
    pub participant: SlopeStructure,
    pub item: SlopeStructure,
}

impl RandomEffectsSpec {
    pub const fn new(participant: SlopeStructure, item: SlopeStructure) -> Self {
        Self { participant, item }
    }

    /// The default simplification ladder for the factorial model
    pub fn default_ladder() -> Vec<RandomEffectsSpec> {
        use SlopeStructure::*;
        vec![
            Self::new(Interaction, Interaction),
            Self::new(Interaction, MainEffects),
            Self::new(MainEffects, MainEffects),
            Self::new(MainEffects, InterceptOnly),
            Self::new(InterceptOnly, InterceptOnly),
        ]
    }

    /// The default ladder for the within-verb-type antecedent models
    pub fn default_pairwise_ladder() -> Vec<RandomEffectsSpec> {
        use SlopeStructure::*;
        vec![
            Self::new(MainEffects, MainEffects),
            Self::new(MainEffects, InterceptOnly),
            Self::new(InterceptOnly, InterceptOnly),
        ]
    }

    /// Random terms per grouping factor, restricted to the fixed terms
    pub fn random_terms(&self, fixed: &[Term]) -> (Vec<Term>, Vec<Term>) {
        (
            self.participant.restricted_to(fixed),
            self.item.restricted_to(fixed),
        )
    }

    /// lme4-style formula for this specification
    pub fn formula(&self, fixed: &[Term]) -> String {
        let (participant, item) = self.random_terms(fixed);
        format!(
            "rt ~ {} + {} + {}",
            fixed_formula(fixed),
            random_formula(&participant, "participant"),
            random_formula(&item, "item")
        )
    }
}

fn fixed_formula(fixed: &[Term]) -> String {
    let has_ant = fixed.contains(&Term::Antecedent);
    let has_verb = fixed.contains(&Term::VerbType);
    let has_int = fixed.contains(&Term::Interaction);
    match (has_ant, has_verb, has_int) {
        (true, true, true) => "antecedent * verb_type".to_string(),
        (true, true, false) => "antecedent + verb_type".to_string(),
        (true, false, _) => "antecedent".to_string(),
        (false, true, _) => "verb_type".to_string(),
        _ => "1".to_string(),
    }
}

fn random_formula(terms: &[Term], group: &str) -> String {
    let slopes: Vec<Term> = terms
        .iter()
        .copied()
        .filter(|t| *t != Term::Intercept)
        .collect();
    if slopes.is_empty() {
        format!("(1 | {})", group)
    } else {
        format!("(1 + {} | {})", fixed_formula(&slopes), group)
    }
}

/// Which contrast a model tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "verb_type", rename_all = "snake_case")]
pub enum Comparison {
    /// antecedent × verb type over the four factorial conditions
    Factorial,
    /// antecedent alone within one verb-type subgroup
    AntecedentWithin(VerbType),
}

impl Comparison {
    pub fn fixed_terms(&self) -> &'static [Term] {
        match self {
            Comparison::Factorial => &Term::ALL,
            Comparison::AntecedentWithin(_) => &[Term::Intercept, Term::Antecedent],
        }
    }

    pub fn includes(&self, condition: Condition) -> bool {
        match self {
            Comparison::Factorial => condition.is_factorial(),
            Comparison::AntecedentWithin(verb) => condition.verb_type() == Some(*verb),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Comparison::Factorial => "antecedent × verb type".to_string(),
            Comparison::AntecedentWithin(verb) => format!("antecedent within {}", verb.as_str()),
        }
    }
}

/// Response, terms and grouping indices for one model
#[derive(Debug, Clone)]
pub struct ModelFrame {
    /// Response (RT in ms)
    pub y: Vec<f64>,
    /// Full sum-coded term vector per row, indexed by `Term::index`
    pub x: Vec<[f64; 4]>,
    /// Participant index per row
    pub participant: Vec<usize>,
    /// Item index per row
    pub item: Vec<usize>,
    pub participant_ids: Vec<String>,
    pub item_ids: Vec<u32>,
}

impl ModelFrame {
    /// Build a frame from the observations of one category that enter `comparison`
    pub fn build(observations: &[Observation], category: &str, comparison: Comparison) -> Self {
        let rows: Vec<&Observation> = observations
            .iter()
            .filter(|o| o.category == category && comparison.includes(o.condition))
            .collect();

        let participant_index: BTreeMap<&str, usize> = rows
            .iter()
            .map(|o| o.participant.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .enumerate()
            .map(|(i, p)| (p, i))
            .collect();
        let item_index: BTreeMap<u32, usize> = rows
            .iter()
            .map(|o| o.item)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .enumerate()
            .map(|(i, it)| (it, i))
            .collect();

        let mut frame = ModelFrame {
            y: Vec::with_capacity(rows.len()),
            x: Vec::with_capacity(rows.len()),
            participant: Vec::with_capacity(rows.len()),
            item: Vec::with_capacity(rows.len()),
            participant_ids: participant_index.keys().map(|p| p.to_string()).collect(),
            item_ids: item_index.keys().copied().collect(),
        };

        for obs in rows {
            // included conditions are factorial, so both factors are present
            let ant = obs.antecedent().map(|a| a.code()).unwrap_or(0.0);
            let verb = obs.verb_type().map(|v| v.code()).unwrap_or(0.0);
            frame.y.push(obs.rt_ms);
            frame.x.push([1.0, ant, verb, ant * verb]);
            frame.participant.push(participant_index[obs.participant.as_str()]);
            frame.item.push(item_index[&obs.item]);
        }

        frame
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn n_participants(&self) -> usize {
        self.participant_ids.len()
    }

    pub fn n_items(&self) -> usize {
        self.item_ids.len()
    }
}
