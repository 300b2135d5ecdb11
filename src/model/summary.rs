//! Text summaries of fitted models, in the layout of an lme4 `summary()`

use crate::model::ladder::LadderFit;
use crate::model::lmm::ModelFit;
use std::fmt::{self, Write as _};

impl fmt::Display for ModelFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Linear mixed model fit by REML")?;
        writeln!(f, "Formula: {}", self.formula)?;
        writeln!(f, "REML criterion at convergence: {:.1}", self.reml_criterion)?;
        writeln!(f)?;

        writeln!(f, "Random effects:")?;
        writeln!(f, " {:<12} {:<22} {:>10} {:>10}  Corr", "Groups", "Name", "Variance", "Std.Dev.")?;
        for component in &self.random_effects {
            for (i, term) in component.terms.iter().enumerate() {
                let group = if i == 0 { component.group.as_str() } else { "" };
                let sd = component.std_devs[i];
                let mut corr = String::new();
                for j in 0..i {
                    let _ = write!(corr, "{:>6.2}", component.correlations[i][j]);
                }
                writeln!(
                    f,
                    " {:<12} {:<22} {:>10.2} {:>10.3} {}",
                    group,
                    term.name(),
                    sd * sd,
                    sd,
                    corr
                )?;
            }
        }
        writeln!(
            f,
            " {:<12} {:<22} {:>10.2} {:>10.3}",
            "Residual",
            "",
            self.sigma * self.sigma,
            self.sigma
        )?;
        let groups: Vec<String> = self
            .random_effects
            .iter()
            .map(|c| format!("{}, {}", c.group, c.n_groups))
            .collect();
        writeln!(f, "Number of obs: {}, groups:  {}", self.n_obs, groups.join("; "))?;
        writeln!(f)?;

        writeln!(f, "Fixed effects:")?;
        writeln!(
            f,
            " {:<22} {:>10} {:>10} {:>8} {:>10}",
            "", "Estimate", "Std.Error", "t value", "Pr(>|z|)"
        )?;
        for fe in &self.fixed_effects {
            writeln!(
                f,
                " {:<22} {:>10.3} {:>10.3} {:>8.3} {:>10.4} {}",
                fe.term.name(),
                fe.estimate,
                fe.std_error,
                fe.t_value,
                fe.p_value,
                significance(fe.p_value)
            )?;
        }

        if !self.diagnostics.warnings.is_empty() {
            writeln!(f)?;
            for w in &self.diagnostics.warnings {
                writeln!(f, "warning: {}", w)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for LadderFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== {} | {} | n = {} ({} participants, {} items) ===",
            self.category,
            self.comparison.label(),
            self.n_obs,
            self.n_participants,
            self.n_items
        )?;

        for (i, rung) in self.rungs.iter().enumerate() {
            let status = match (&rung.fit, &rung.error) {
                (Some(fit), _) if fit.diagnostics.is_clean() => "ok".to_string(),
                (Some(fit), _) => fit.diagnostics.warnings.join("; "),
                (None, Some(e)) => format!("failed: {}", e),
                (None, None) => "not fitted".to_string(),
            };
            let marker = if self.selected == Some(i) { "*" } else { " " };
            writeln!(f, "{} [{}] {}  -- {}", marker, i + 1, rung.formula, status)?;
        }

        match self.selected_fit() {
            Some(fit) => {
                if !self.selected_clean {
                    writeln!(f, "no rung converged without a singular fit; showing the simplest")?;
                }
                writeln!(f)?;
                write!(f, "{}", fit)
            }
            None => writeln!(f, "no model could be fitted"),
        }
    }
}

fn significance(p: f64) -> &'static str {
    if !p.is_finite() {
        ""
    } else if p < 0.001 {
        "***"
    } else if p < 0.01 {
        "**"
    } else if p < 0.05 {
        "*"
    } else if p < 0.1 {
        "."
    } else {
        ""
    }
}
