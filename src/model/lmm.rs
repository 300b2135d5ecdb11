//! Linear mixed-effects model fitting by REML
//!
//! The model is `y = Xβ + ZΛθu + ε` with spherical `u ~ N(0, σ²I)` and a
//! block-diagonal relative covariance factor `Λθ` holding one lower-triangular
//! block per grouping factor (Bates, Mächler, Bolker & Walker 2015). For a given
//! `θ` the fixed effects and the penalised residual sum of squares follow from
//! the Cholesky factor of `Λ'Z'ZΛ + I` and the Schur complement of the fixed
//! block, which gives the profiled REML deviance minimised over `θ`.
//!
//! Every row touches exactly one level of each grouping factor, so the cross
//! products are accumulated once per level instead of materialising `Z`, and
//! each evaluation only transforms those small blocks by `Λθ`.

use crate::model::design::{ModelFrame, RandomEffectsSpec, Term};
use crate::model::optimize::{derivatives, minimize, NelderMeadOptions};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;

/// Diagonal elements of `θ` below this are treated as on the boundary
pub const SINGULAR_TOLERANCE: f64 = 1e-4;

/// Largest acceptable scaled gradient component at the optimum
pub const GRADIENT_TOLERANCE: f64 = 0.002;

/// One fixed-effect coefficient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedEffect {
    pub term: Term,
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
    /// Two-sided p value from the normal approximation of t
    pub p_value: f64,
}

/// Estimated covariance of one grouping factor's random effects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceComponent {
    pub group: String,
    pub n_groups: usize,
    pub terms: Vec<Term>,
    pub std_devs: Vec<f64>,
    /// Row-major correlation matrix (terms × terms)
    pub correlations: Vec<Vec<f64>>,
}

/// Convergence and boundary diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub converged: bool,
    pub singular: bool,
    pub evaluations: usize,
    pub max_scaled_gradient: f64,
    pub warnings: Vec<String>,
}

impl FitDiagnostics {
    /// Whether the fit is usable as the selected model
    pub fn is_clean(&self) -> bool {
        self.converged && !self.singular
    }
}

/// A fitted linear mixed model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFit {
    pub formula: String,
    pub n_obs: usize,
    pub reml_criterion: f64,
    pub sigma: f64,
    pub fixed_effects: Vec<FixedEffect>,
    pub random_effects: Vec<VarianceComponent>,
    pub theta: Vec<f64>,
    pub diagnostics: FitDiagnostics,
}

impl ModelFit {
    pub fn fixed(&self, term: Term) -> Option<&FixedEffect> {
        self.fixed_effects.iter().find(|f| f.term == term)
    }

    pub fn component(&self, group: &str) -> Option<&VarianceComponent> {
        self.random_effects.iter().find(|c| c.group == group)
    }
}

/// Failure to fit a model at all
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("not enough observations ({n_obs}) for {n_fixed} fixed effects")]
    NotEnoughData { n_obs: usize, n_fixed: usize },

    #[error("fixed-effect design is rank deficient")]
    RankDeficient,

    #[error("penalised system is not positive definite at the optimum")]
    NotPositiveDefinite,
}

/// A grouping factor with its random terms and θ-free cross products
struct Factor {
    name: &'static str,
    n_levels: usize,
    terms: Vec<Term>,
    /// Z_g'Z_g per level (k × k)
    gram: Vec<DMatrix<f64>>,
    /// Z_g'[X y] per level (k × (p + 1))
    zb: Vec<DMatrix<f64>>,
}

impl Factor {
    fn width(&self) -> usize {
        self.terms.len()
    }

    fn n_theta(&self) -> usize {
        let k = self.width();
        k * (k + 1) / 2
    }
}

/// Linear mixed model with crossed participant and item factors
pub struct MixedModel {
    n_obs: usize,
    fixed: Vec<Term>,
    factors: Vec<Factor>,
    /// Factor eliminated level by level; the other one is factored densely
    eliminated: usize,
    /// Z_e'Z_d between the eliminated and the dense factor
    cross: Option<DMatrix<f64>>,
    xtx: DMatrix<f64>,
    xty: DVector<f64>,
    yty: f64,
}

/// Quantities of one deviance evaluation
struct Evaluation {
    deviance: f64,
    beta: DVector<f64>,
    sigma2: f64,
    schur: DMatrix<f64>,
}

impl MixedModel {
    pub fn new(frame: &ModelFrame, fixed: &[Term], spec: RandomEffectsSpec) -> Self {
        let (participant_terms, item_terms) = spec.random_terms(fixed);
        let p = fixed.len();
        let m = p + 1;

        let mut factors = Vec::new();
        let mut levels = Vec::new();
        for (name, level_of, n_levels, terms) in [
            ("participant", &frame.participant, frame.n_participants(), participant_terms),
            ("item", &frame.item, frame.n_items(), item_terms),
        ] {
            if terms.is_empty() || n_levels == 0 {
                continue;
            }
            let k = terms.len();
            let mut gram = vec![DMatrix::<f64>::zeros(k, k); n_levels];
            let mut zb = vec![DMatrix::<f64>::zeros(k, m); n_levels];
            for (i, row) in frame.x.iter().enumerate() {
                let g = level_of[i];
                for (a, ta) in terms.iter().enumerate() {
                    let za = row[ta.index()];
                    for (b, tb) in terms.iter().enumerate() {
                        gram[g][(a, b)] += za * row[tb.index()];
                    }
                    for (c, tc) in fixed.iter().enumerate() {
                        zb[g][(a, c)] += za * row[tc.index()];
                    }
                    zb[g][(a, p)] += za * frame.y[i];
                }
            }
            factors.push(Factor {
                name,
                n_levels,
                terms,
                gram,
                zb,
            });
            levels.push(level_of);
        }

        // eliminate the larger factor so the dense block stays small
        let eliminated = if factors.len() == 2
            && factors[1].n_levels * factors[1].width() > factors[0].n_levels * factors[0].width()
        {
            1
        } else {
            0
        };

        let cross = (factors.len() == 2).then(|| {
            let dense = 1 - eliminated;
            let (fe, fd) = (&factors[eliminated], &factors[dense]);
            let (ke, kd) = (fe.width(), fd.width());
            let mut cross = DMatrix::<f64>::zeros(fe.n_levels * ke, fd.n_levels * kd);
            for (i, row) in frame.x.iter().enumerate() {
                let (g, h) = (levels[eliminated][i], levels[dense][i]);
                for (a, ta) in fe.terms.iter().enumerate() {
                    for (b, tb) in fd.terms.iter().enumerate() {
                        cross[(g * ke + a, h * kd + b)] += row[ta.index()] * row[tb.index()];
                    }
                }
            }
            cross
        });

        let mut xtx = DMatrix::zeros(p, p);
        let mut xty = DVector::zeros(p);
        for (row, y) in frame.x.iter().zip(&frame.y) {
            for (a, ta) in fixed.iter().enumerate() {
                xty[a] += row[ta.index()] * y;
                for (b, tb) in fixed.iter().enumerate() {
                    xtx[(a, b)] += row[ta.index()] * row[tb.index()];
                }
            }
        }
        let yty = frame.y.iter().map(|y| y * y).sum::<f64>();

        Self {
            n_obs: frame.len(),
            fixed: fixed.to_vec(),
            factors,
            eliminated,
            cross,
            xtx,
            xty,
            yty,
        }
    }

    pub fn n_theta(&self) -> usize {
        self.factors.iter().map(Factor::n_theta).sum()
    }

    /// Lower bounds of `θ`: zero on block diagonals, unbounded elsewhere
    pub fn lower_bounds(&self) -> Vec<f64> {
        let mut lower = Vec::with_capacity(self.n_theta());
        for factor in &self.factors {
            let k = factor.width();
            for j in 0..k {
                for i in j..k {
                    lower.push(if i == j { 0.0 } else { f64::NEG_INFINITY });
                }
            }
        }
        lower
    }

    /// Starting value of `θ`: identity blocks
    pub fn initial_theta(&self) -> Vec<f64> {
        let mut theta = Vec::with_capacity(self.n_theta());
        for factor in &self.factors {
            let k = factor.width();
            for j in 0..k {
                for i in j..k {
                    theta.push(if i == j { 1.0 } else { 0.0 });
                }
            }
        }
        theta
    }

    /// Lower-triangular block of each factor, filled column-major from `θ`
    fn blocks(&self, theta: &[f64]) -> Vec<DMatrix<f64>> {
        let mut pos = 0;
        self.factors
            .iter()
            .map(|factor| {
                let k = factor.width();
                let mut t = DMatrix::zeros(k, k);
                for j in 0..k {
                    for i in j..k {
                        t[(i, j)] = theta[pos];
                        pos += 1;
                    }
                }
                t
            })
            .collect()
    }

    /// `[X y]' Z Λ (Λ'Z'ZΛ + I)⁻¹ Λ'Z' [X y]` and `log|Λ'Z'ZΛ + I|`.
    ///
    /// The eliminated factor's diagonal blocks are factored one level at a
    /// time; the dense factor enters through the Schur complement
    /// `S = D_d - C' D_e⁻¹ C`.
    fn random_projection(&self, blocks: &[DMatrix<f64>]) -> Option<(DMatrix<f64>, f64)> {
        let m = self.fixed.len() + 1;
        let mut projection = DMatrix::<f64>::zeros(m, m);
        let mut log_det = 0.0;
        if self.factors.is_empty() {
            return Some((projection, log_det));
        }

        let e = self.eliminated;
        let fe = &self.factors[e];
        let te = &blocks[e];
        let ke = fe.width();

        let mut chols = Vec::with_capacity(fe.n_levels);
        let mut be = Vec::with_capacity(fe.n_levels);
        let mut te_be = Vec::with_capacity(fe.n_levels);
        for (gram, zb) in fe.gram.iter().zip(&fe.zb) {
            let d = te.transpose() * gram * te + DMatrix::identity(ke, ke);
            let chol = d.cholesky()?;
            log_det += 2.0 * chol.l().diagonal().iter().map(|v| v.ln()).sum::<f64>();
            let b = te.transpose() * zb;
            te_be.push(chol.solve(&b));
            be.push(b);
            chols.push(chol);
        }

        let Some(cross) = &self.cross else {
            for (b, t) in be.iter().zip(&te_be) {
                projection += b.transpose() * t;
            }
            return Some((projection, log_det));
        };

        let d = 1 - e;
        let fd = &self.factors[d];
        let td = &blocks[d];
        let kd = fd.width();
        let nd = fd.n_levels * kd;

        let mut schur = DMatrix::<f64>::identity(nd, nd);
        let mut bd = DMatrix::<f64>::zeros(nd, m);
        for (h, (gram, zb)) in fd.gram.iter().zip(&fd.zb).enumerate() {
            let block = td.transpose() * gram * td;
            let mut view = schur.view_mut((h * kd, h * kd), (kd, kd));
            view += block;
            bd.view_mut((h * kd, 0), (kd, m)).copy_from(&(td.transpose() * zb));
        }

        // C = blockdiag(T_e') Z_e'Z_d blockdiag(T_d), one level of e at a time
        let mut w = Vec::with_capacity(fe.n_levels);
        for (g, chol) in chols.iter().enumerate() {
            let mut c = DMatrix::<f64>::zeros(ke, nd);
            for h in 0..fd.n_levels {
                let raw = cross.view((g * ke, h * kd), (ke, kd));
                c.view_mut((0, h * kd), (ke, kd))
                    .copy_from(&(te.transpose() * raw * td));
            }
            let wg = chol.solve(&c);
            schur -= c.transpose() * &wg;
            bd -= c.transpose() * &te_be[g];
            w.push(wg);
        }

        let schur_chol = schur.cholesky()?;
        log_det += 2.0 * schur_chol.l().diagonal().iter().map(|v| v.ln()).sum::<f64>();
        let zd = schur_chol.solve(&bd);

        for (g, b) in be.iter().enumerate() {
            let ze = &te_be[g] - &w[g] * &zd;
            projection += b.transpose() * ze;
        }
        for h in 0..fd.n_levels {
            let b = td.transpose() * &fd.zb[h];
            projection += b.transpose() * zd.rows(h * kd, kd);
        }
        Some((projection, log_det))
    }

    /// Profiled REML deviance and the estimates it implies
    fn evaluate(&self, theta: &[f64]) -> Option<Evaluation> {
        let n = self.n_obs;
        let p = self.fixed.len();
        let blocks = self.blocks(theta);
        let (projection, log_det_l) = self.random_projection(&blocks)?;

        let schur = &self.xtx - projection.view((0, 0), (p, p));
        let rhs = &self.xty - projection.column(p).rows(0, p);
        let rx = schur.clone().cholesky()?;
        let beta = rx.solve(&rhs);

        // penalised RSS = y'y - y'ZΛ A⁻¹ Λ'Z'y - β'(X'y - X'ZΛ A⁻¹ Λ'Z'y)
        let rss = self.yty - projection[(p, p)] - beta.dot(&rhs);

        let dof = (n - p) as f64;
        let rss = rss.max(f64::MIN_POSITIVE);
        let log_det_rx: f64 = 2.0 * rx.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        let deviance = log_det_l + log_det_rx + dof * (1.0 + (2.0 * PI * rss / dof).ln());

        Some(Evaluation {
            deviance,
            beta,
            sigma2: rss / dof,
            schur,
        })
    }

    /// REML deviance at `θ` (infinite where the system breaks down)
    pub fn deviance(&self, theta: &[f64]) -> f64 {
        self.evaluate(theta)
            .map(|e| e.deviance)
            .unwrap_or(f64::INFINITY)
    }

    /// Fit the model by minimising the REML deviance over `θ`
    pub fn fit(&self, options: NelderMeadOptions, formula: String) -> Result<ModelFit, FitError> {
        let n = self.n_obs;
        let p = self.fixed.len();
        if n <= p {
            return Err(FitError::NotEnoughData {
                n_obs: n,
                n_fixed: p,
            });
        }
        if self.xtx.clone().cholesky().is_none() {
            return Err(FitError::RankDeficient);
        }

        let lower = self.lower_bounds();
        let minimum = minimize(
            |theta| self.deviance(theta),
            &self.initial_theta(),
            &lower,
            options,
        );
        let theta = minimum.x;
        let eval = self
            .evaluate(&theta)
            .ok_or(FitError::NotPositiveDefinite)?;

        let singular = self.is_singular(&theta);
        let max_scaled_gradient = self.scaled_gradient(&theta, &lower, eval.deviance);
        let converged = minimum.converged && max_scaled_gradient <= GRADIENT_TOLERANCE;

        let mut warnings = Vec::new();
        if !minimum.converged {
            warnings.push(format!(
                "optimizer stopped after {} evaluations without converging",
                minimum.evaluations
            ));
        }
        if max_scaled_gradient > GRADIENT_TOLERANCE {
            warnings.push(format!(
                "model failed to converge: max|scaled grad| = {:.4} (tol = {})",
                max_scaled_gradient, GRADIENT_TOLERANCE
            ));
        }
        if singular {
            warnings.push("boundary (singular) fit".to_string());
        }

        let vcov = eval
            .schur
            .clone()
            .try_inverse()
            .ok_or(FitError::RankDeficient)?
            * eval.sigma2;
        let normal = Normal::new(0.0, 1.0).map_err(|_| FitError::RankDeficient)?;
        let fixed_effects = self
            .fixed
            .iter()
            .enumerate()
            .map(|(j, term)| {
                let estimate = eval.beta[j];
                let std_error = vcov[(j, j)].max(0.0).sqrt();
                let t_value = if std_error > 0.0 {
                    estimate / std_error
                } else {
                    f64::NAN
                };
                let p_value = if t_value.is_finite() {
                    2.0 * (1.0 - normal.cdf(t_value.abs()))
                } else {
                    f64::NAN
                };
                FixedEffect {
                    term: *term,
                    estimate,
                    std_error,
                    t_value,
                    p_value,
                }
            })
            .collect();

        let random_effects = self
            .factors
            .iter()
            .zip(self.blocks(&theta))
            .map(|(factor, t)| variance_component(factor, &t, eval.sigma2))
            .collect();

        Ok(ModelFit {
            formula,
            n_obs: n,
            reml_criterion: eval.deviance,
            sigma: eval.sigma2.sqrt(),
            fixed_effects,
            random_effects,
            theta,
            diagnostics: FitDiagnostics {
                converged,
                singular,
                evaluations: minimum.evaluations,
                max_scaled_gradient,
                warnings,
            },
        })
    }

    /// Whether any block diagonal of `θ` sits on the zero boundary
    pub fn is_singular(&self, theta: &[f64]) -> bool {
        self.lower_bounds()
            .iter()
            .zip(theta)
            .any(|(lo, t)| *lo == 0.0 && *t < SINGULAR_TOLERANCE)
    }

    /// Largest gradient component over interior parameters, each taken as the
    /// smaller of its Hessian-scaled (`R⁻¹g` with `H = R'R`) and raw value
    fn scaled_gradient(&self, theta: &[f64], lower: &[f64], f0: f64) -> f64 {
        let mut deviance = |t: &[f64]| self.deviance(t);
        let d = derivatives(&mut deviance, theta, f0, lower);
        if d.free.is_empty() {
            return 0.0;
        }
        let raw = d.gradient.clone();
        let scaled = d
            .hessian
            .clone()
            .cholesky()
            .and_then(|chol| chol.l().transpose().solve_upper_triangular(&d.gradient));
        match scaled {
            Some(s) => s
                .iter()
                .zip(raw.iter())
                .map(|(s, g)| s.abs().min(g.abs()))
                .fold(0.0, f64::max),
            None => raw.iter().map(|g| g.abs()).fold(0.0, f64::max),
        }
    }
}

/// Σ = σ² T T' reported as standard deviations and correlations
fn variance_component(factor: &Factor, t: &DMatrix<f64>, sigma2: f64) -> VarianceComponent {
    let cov = t * t.transpose() * sigma2;
    let k = factor.width();
    let std_devs: Vec<f64> = (0..k).map(|i| cov[(i, i)].max(0.0).sqrt()).collect();
    let correlations = (0..k)
        .map(|i| {
            (0..k)
                .map(|j| {
                    if i == j {
                        1.0
                    } else if std_devs[i] > 0.0 && std_devs[j] > 0.0 {
                        cov[(i, j)] / (std_devs[i] * std_devs[j])
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    VarianceComponent {
        group: factor.name.to_string(),
        n_groups: factor.n_levels,
        terms: factor.terms.clone(),
        std_devs,
        correlations,
    }
}

/// Fit one model specification on a frame
pub fn fit_model(
    frame: &ModelFrame,
    fixed: &[Term],
    spec: RandomEffectsSpec,
    options: NelderMeadOptions,
) -> Result<ModelFit, FitError> {
    let model = MixedModel::new(frame, fixed, spec);
    model.fit(options, spec.formula(fixed))
}
