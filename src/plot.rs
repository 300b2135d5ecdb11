//! Reading-time line chart
//!
//! One line per condition over the position axis, with ±1 SE error bars.
//! Verb type sets the colour, antecedent presence the line style and marker.
//! A missing cell splits the line into separate segments.

use crate::aggregate::AggregateTable;
use crate::config::ChartConfig;
use crate::error::AnalysisError;
use crate::types::{Antecedent, Condition, VerbType};
use plotters::coord::ranged1d::SegmentValue;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use tracing::info;

const OPT_COLOR: RGBColor = RGBColor(31, 119, 180);
const OT_COLOR: RGBColor = RGBColor(214, 39, 40);
const CONTROL_COLOR: RGBColor = RGBColor(128, 128, 128);

/// How one condition is drawn
#[derive(Debug, Clone, Copy)]
pub struct SeriesStyle {
    pub color: RGBColor,
    pub dashed: bool,
    pub filled_marker: bool,
}

impl SeriesStyle {
    pub fn for_condition(condition: Condition) -> Self {
        let color = match condition.verb_type() {
            Some(VerbType::Opt) => OPT_COLOR,
            Some(VerbType::Ot) => OT_COLOR,
            None => CONTROL_COLOR,
        };
        let absent = condition.antecedent() == Some(Antecedent::Absent);
        Self {
            color,
            dashed: absent,
            filled_marker: !absent,
        }
    }
}

/// Split a gappy sequence into its maximal runs of defined values
pub fn contiguous_runs<T: Clone>(points: &[Option<T>]) -> Vec<Vec<T>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for p in points {
        match p {
            Some(v) => current.push(v.clone()),
            None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn plot_err<E: std::fmt::Display>(e: E) -> AnalysisError {
    AnalysisError::Plot(e.to_string())
}

/// Y range covering every mean ± SE with 10% headroom
fn y_range(table: &AggregateTable) -> Option<(f64, f64)> {
    let (lo, hi) = table
        .cells
        .iter()
        .filter_map(|c| c.stats)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s.mean_rt - s.se), hi.max(s.mean_rt + s.se))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return None;
    }
    let pad = ((hi - lo) * 0.1).max(10.0);
    Some(((lo - pad).max(0.0), hi + pad))
}

/// Render the aggregate table as an SVG chart at `config.path`
pub fn render_chart(table: &AggregateTable, config: &ChartConfig) -> Result<(), AnalysisError> {
    let (y_lo, y_hi) =
        y_range(table).ok_or_else(|| AnalysisError::Plot("no aggregate cells to plot".to_string()))?;
    let n = table.categories.len() as i32;

    let root = SVGBackend::new(&config.path, (config.width, config.height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(&config.title, ("sans-serif", 22))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d((0..n).into_segmented(), y_lo..y_hi)
        .map_err(plot_err)?;

    let names = &table.categories;
    let x_label = |v: &SegmentValue<i32>| match v {
        SegmentValue::CenterOf(i) => names.get(*i as usize).cloned().unwrap_or_default(),
        _ => String::new(),
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(names.len())
        .x_label_formatter(&x_label)
        .x_label_style(("sans-serif", 11))
        .x_desc("word position")
        .y_desc("mean RT (ms)")
        .draw()
        .map_err(plot_err)?;

    for &condition in &table.conditions {
        let style = SeriesStyle::for_condition(condition);
        let line_style = style.color.stroke_width(2);
        let marker_style = if style.filled_marker {
            style.color.filled()
        } else {
            style.color.stroke_width(2)
        };

        let points: Vec<Option<(SegmentValue<i32>, f64, f64)>> = table
            .series(condition)
            .enumerate()
            .map(|(i, cell)| {
                cell.stats
                    .map(|s| (SegmentValue::CenterOf(i as i32), s.mean_rt, s.se))
            })
            .collect();

        for (k, run) in contiguous_runs(&points).into_iter().enumerate() {
            let line: Vec<(SegmentValue<i32>, f64)> = run.iter().map(|(x, m, _)| (x.clone(), *m)).collect();

            let anno = if style.dashed {
                chart
                    .draw_series(DashedLineSeries::new(line.clone(), 8u32, 5u32, line_style))
                    .map_err(plot_err)?
            } else {
                chart
                    .draw_series(LineSeries::new(line.clone(), line_style))
                    .map_err(plot_err)?
            };
            if k == 0 {
                let color = style.color;
                anno.label(condition.as_str())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 24, y)], color.stroke_width(2)));
            }

            chart
                .draw_series(run.iter().map(|(x, m, se)| {
                    ErrorBar::new_vertical(x.clone(), m - se, *m, m + se, style.color.stroke_width(1), 8)
                }))
                .map_err(plot_err)?;

            chart
                .draw_series(line.into_iter().map(|p| Circle::new(p, 4, marker_style)))
                .map_err(plot_err)?;
        }
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    info!(path = %config.path.display(), "chart written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::config::PositionScheme;
    use crate::types::Observation;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_contiguous_runs_break_on_gaps() {
        let points = [Some(1), Some(2), None, None, Some(5), None, Some(7), Some(8)];
        assert_eq!(contiguous_runs(&points), vec![vec![1, 2], vec![5], vec![7, 8]]);
        assert!(contiguous_runs::<i32>(&[None, None]).is_empty());
    }

    #[test]
    fn test_series_styles() {
        let opt_absent = SeriesStyle::for_condition(Condition::OptNoAnt);
        assert_eq!(opt_absent.color.rgb(), OPT_COLOR.rgb());
        assert!(opt_absent.dashed);
        assert!(!opt_absent.filled_marker);

        let ot_present = SeriesStyle::for_condition(Condition::OtAnt);
        assert_eq!(ot_present.color.rgb(), OT_COLOR.rgb());
        assert!(!ot_present.dashed);

        let control = SeriesStyle::for_condition(Condition::Control);
        assert_eq!(control.color.rgb(), CONTROL_COLOR.rgb());
        assert!(!control.dashed);
        assert!(control.filled_marker);
    }

    fn obs(condition: Condition, category: &str, rt: f64) -> Observation {
        Observation {
            participant: "p".to_string(),
            list: "1".to_string(),
            item: 1,
            condition,
            position_label: category.to_string(),
            category: category.to_string(),
            word: "w".to_string(),
            rt_ms: rt,
            raw_rt_ms: rt,
            winsorized: false,
        }
    }

    #[test]
    fn test_render_writes_svg() {
        let positions = PositionScheme {
            order: vec!["pronoun".into(), "main_verb".into(), "spillover_1".into()],
            aliases: Default::default(),
        };
        let data = vec![
            obs(Condition::OptAnt, "pronoun", 340.0),
            obs(Condition::OptAnt, "pronoun", 360.0),
            obs(Condition::OptAnt, "spillover_1", 420.0),
            obs(Condition::OtNoAnt, "main_verb", 450.0),
            obs(Condition::OtNoAnt, "spillover_1", 400.0),
        ];
        let table = Aggregator::aggregate(&data, &positions);

        let dir = tempfile::tempdir().unwrap();
        let config = ChartConfig {
            path: dir.path().join("chart.svg"),
            ..ChartConfig::default()
        };
        render_chart(&table, &config).unwrap();

        let svg = std::fs::read_to_string(&config.path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("OPT-Ant"));
        assert!(svg.contains("main_verb"));
    }

    #[test]
    fn test_render_empty_table_fails() {
        let table = Aggregator::aggregate(&[], &PositionScheme::default());
        let err = render_chart(&table, &ChartConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Plot(_)));
    }
}
