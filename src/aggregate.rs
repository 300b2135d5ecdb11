//! Condition × position aggregation
//!
//! Produces the table behind the reading-time chart. Every combination of an
//! observed condition and a configured category gets an entry, so gaps stay
//! explicit instead of being interpolated over.

use crate::config::PositionScheme;
use crate::types::{AggregateCell, CellStats, Condition, Observation};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Mean and standard error per condition and position category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateTable {
    /// Conditions present in the data, in canonical order
    pub conditions: Vec<Condition>,
    /// Categories in axis order
    pub categories: Vec<String>,
    /// Condition-major, category-minor
    pub cells: Vec<AggregateCell>,
}

impl AggregateTable {
    pub fn get(&self, condition: Condition, category: &str) -> Option<&AggregateCell> {
        self.cells
            .iter()
            .find(|c| c.condition == condition && c.category == category)
    }

    /// Cells of one condition in axis order
    pub fn series(&self, condition: Condition) -> impl Iterator<Item = &AggregateCell> {
        self.cells.iter().filter(move |c| c.condition == condition)
    }

    /// Fixed-width text rendering, one row per condition
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<12} {:<16} {:>10} {:>8} {:>6}",
            "condition", "position", "mean_rt", "se", "n"
        );
        for cell in &self.cells {
            match cell.stats {
                Some(s) => {
                    let _ = writeln!(
                        out,
                        "{:<12} {:<16} {:>10.1} {:>8.1} {:>6}",
                        cell.condition, cell.category, s.mean_rt, s.se, s.n
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "{:<12} {:<16} {:>10} {:>8} {:>6}",
                        cell.condition, cell.category, "NA", "NA", 0
                    );
                }
            }
        }
        out
    }
}

/// Builds the aggregate table
pub struct Aggregator;

impl Aggregator {
    /// Mean, SE (sample SD / √n, 0 for a single row) and count of a sample
    pub fn cell_stats(rts: &[f64]) -> Option<CellStats> {
        let n = rts.len();
        if n == 0 {
            return None;
        }
        let mean_rt = rts.iter().mean();
        let se = if n == 1 {
            0.0
        } else {
            rts.iter().std_dev() / (n as f64).sqrt()
        };
        Some(CellStats { mean_rt, se, n })
    }

    pub fn aggregate(observations: &[Observation], positions: &PositionScheme) -> AggregateTable {
        let mut buckets: BTreeMap<(Condition, &str), Vec<f64>> = BTreeMap::new();
        for o in observations {
            buckets
                .entry((o.condition, o.category.as_str()))
                .or_default()
                .push(o.rt_ms);
        }

        let conditions: Vec<Condition> = observations
            .iter()
            .map(|o| o.condition)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut cells = Vec::with_capacity(conditions.len() * positions.order.len());
        for &condition in &conditions {
            for category in &positions.order {
                let stats = buckets
                    .get(&(condition, category.as_str()))
                    .and_then(|rts| Self::cell_stats(rts));
                cells.push(AggregateCell {
                    condition,
                    category: category.clone(),
                    stats,
                });
            }
        }

        AggregateTable {
            conditions,
            categories: positions.order.clone(),
            cells,
        }
    }
}
