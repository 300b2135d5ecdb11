//! Reading-time outlier treatment
//!
//! Two passes, in order: a hard trim to (rt_min, rt_max], then per-category
//! winsorization of the upper tail at mean + k·SD. The SDs are computed on
//! the trimmed data.

use crate::config::AnalysisConfig;
use crate::types::{Observation, TrimStats, WinsorStats};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Result of both outlier passes
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierOutput {
    pub observations: Vec<Observation>,
    pub trim: TrimStats,
    /// One entry per category present after trimming, ordered by name
    pub winsor: Vec<WinsorStats>,
}

/// Stateless outlier passes
pub struct OutlierProcessor;

impl OutlierProcessor {
    /// Run the hard trim then winsorization
    pub fn process(observations: Vec<Observation>, config: &AnalysisConfig) -> OutlierOutput {
        let (mut kept, trim) = Self::hard_trim(observations, config.rt_min_ms, config.rt_max_ms);
        let winsor = Self::winsorize(&mut kept, config.winsor_sd);
        OutlierOutput {
            observations: kept,
            trim,
            winsor,
        }
    }

    /// Drop rows with RT <= `min` or RT > `max`
    pub fn hard_trim(observations: Vec<Observation>, min: f64, max: f64) -> (Vec<Observation>, TrimStats) {
        let mut stats = TrimStats {
            input: observations.len(),
            ..TrimStats::default()
        };

        let kept: Vec<Observation> = observations
            .into_iter()
            .filter(|o| {
                if o.rt_ms <= min {
                    stats.dropped_low += 1;
                    false
                } else if o.rt_ms > max {
                    stats.dropped_high += 1;
                    false
                } else {
                    true
                }
            })
            .collect();
        stats.kept = kept.len();

        info!(
            kept = stats.kept,
            dropped_low = stats.dropped_low,
            dropped_high = stats.dropped_high,
            "hard trim applied"
        );
        (kept, stats)
    }

    /// Clamp RTs above mean + `k`·SD of their category down to the cap
    pub fn winsorize(observations: &mut [Observation], k: f64) -> Vec<WinsorStats> {
        let mut by_category: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, o) in observations.iter().enumerate() {
            by_category.entry(o.category.clone()).or_default().push(i);
        }

        let mut stats = Vec::with_capacity(by_category.len());
        for (category, indices) in by_category {
            let rts: Vec<f64> = indices.iter().map(|&i| observations[i].rt_ms).collect();
            let n = rts.len();
            let mean = rts.iter().mean();

            let (sd, cap) = if n >= 2 {
                let sd = rts.iter().std_dev();
                (Some(sd), Some(mean + k * sd))
            } else {
                (None, None)
            };

            let mut clamped = 0;
            if let Some(cap) = cap {
                for &i in &indices {
                    let o = &mut observations[i];
                    if o.rt_ms > cap {
                        o.rt_ms = cap;
                        o.winsorized = true;
                        clamped += 1;
                    }
                }
            }

            debug!(category = %category, n, mean, ?sd, ?cap, clamped, "winsorized category");
            stats.push(WinsorStats {
                category,
                n,
                mean,
                sd,
                cap,
                clamped,
            });
        }

        info!(
            clamped = stats.iter().map(|s| s.clamped).sum::<usize>(),
            categories = stats.len(),
            "winsorization applied"
        );
        stats
    }
}
