//! Bounded minimisation of the profiled deviance
//!
//! The search is a Nelder–Mead simplex with the dimension-adaptive coefficients
//! of Gao & Han (2012). Lower bounds are enforced by projecting every trial
//! point onto the feasible box before it is evaluated. After the simplex
//! collapses the search restarts from the best point until a restart no
//! longer improves the objective. A few projected Newton steps on
//! finite-difference derivatives then polish the interior coordinates.

use nalgebra::{DMatrix, DVector};

/// Options for the search
#[derive(Debug, Clone, Copy)]
pub struct NelderMeadOptions {
    /// Maximum objective evaluations across all passes
    pub max_evaluations: usize,
    /// Absolute tolerance on the spread of objective values in the simplex
    pub f_tolerance: f64,
    /// Initial step along each coordinate
    pub initial_step: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            max_evaluations: 20_000,
            f_tolerance: 1e-8,
            initial_step: 0.25,
        }
    }
}

/// Result of a minimisation
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub fx: f64,
    pub evaluations: usize,
    pub converged: bool,
}

/// Step for central differences
pub const DIFFERENCE_STEP: f64 = 1e-3;

const MAX_RESTARTS: usize = 10;
const MAX_NEWTON_STEPS: usize = 6;
const X_TOLERANCE: f64 = 1e-9;

/// Simplex coefficients for dimension `n`
#[derive(Debug, Clone, Copy)]
struct Coefficients {
    reflect: f64,
    expand: f64,
    contract: f64,
    shrink: f64,
}

impl Coefficients {
    /// Gao & Han's adaptive values; the standard ones for n <= 2
    fn adaptive(n: usize) -> Self {
        let n = n.max(2) as f64;
        Self {
            reflect: 1.0,
            expand: 1.0 + 2.0 / n,
            contract: 0.75 - 1.0 / (2.0 * n),
            shrink: 1.0 - 1.0 / n,
        }
    }
}

/// Simplex search followed by a Newton polish
pub fn minimize<F>(mut f: F, x0: &[f64], lower: &[f64], options: NelderMeadOptions) -> Minimum
where
    F: FnMut(&[f64]) -> f64,
{
    let simplex = nelder_mead(&mut f, x0, lower, options);
    let polished = newton_polish(&mut f, &simplex.x, simplex.fx, lower, options);
    Minimum {
        evaluations: simplex.evaluations + polished.evaluations,
        converged: simplex.converged || polished.converged,
        x: polished.x,
        fx: polished.fx,
    }
}

/// Minimise `f` starting at `x0`, keeping every coordinate `>= lower[i]`
pub fn nelder_mead<F>(mut f: F, x0: &[f64], lower: &[f64], options: NelderMeadOptions) -> Minimum
where
    F: FnMut(&[f64]) -> f64,
{
    let mut eval = |x: &[f64]| finite_or_inf(f(x));

    let start = project(x0, lower);
    if start.is_empty() {
        let fx = eval(&start);
        return Minimum {
            x: start,
            fx,
            evaluations: 1,
            converged: true,
        };
    }

    let coefficients = Coefficients::adaptive(start.len());
    let budget = options.max_evaluations;
    let mut used = 0;
    let mut best = simplex_pass(&mut eval, &start, lower, options, coefficients, budget);
    used += best.used;
    if !best.collapsed {
        return Minimum {
            x: best.x,
            fx: best.fx,
            evaluations: used,
            converged: false,
        };
    }

    let mut converged = false;
    for _ in 0..MAX_RESTARTS {
        let remaining = budget.saturating_sub(used);
        if remaining == 0 {
            break;
        }
        let pass = simplex_pass(&mut eval, &best.x, lower, options, coefficients, remaining);
        used += pass.used;
        let improved = best.fx - pass.fx;
        let collapsed = pass.collapsed;
        if pass.fx < best.fx {
            best = pass;
        }
        if !collapsed {
            break;
        }
        if improved <= options.f_tolerance * 10.0 {
            converged = true;
            break;
        }
    }

    Minimum {
        x: best.x,
        fx: best.fx,
        evaluations: used,
        converged,
    }
}

struct Pass {
    x: Vec<f64>,
    fx: f64,
    used: usize,
    /// Simplex collapsed before the budget ran out
    collapsed: bool,
}

/// One simplex search from `start`
fn simplex_pass<E>(
    eval: &mut E,
    start: &[f64],
    lower: &[f64],
    options: NelderMeadOptions,
    coefficients: Coefficients,
    budget: usize,
) -> Pass
where
    E: FnMut(&[f64]) -> f64,
{
    let n = start.len();
    let mut used = 0usize;

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(start.to_vec());
    for i in 0..n {
        let mut v = start.to_vec();
        let step = options.initial_step * start[i].abs().max(1.0);
        v[i] += step;
        simplex.push(project(&v, lower));
    }
    let mut values: Vec<f64> = simplex
        .iter()
        .map(|v| {
            used += 1;
            eval(v)
        })
        .collect();

    loop {
        order(&mut simplex, &mut values);

        let spread = values[n] - values[0];
        let both_infinite = !values[0].is_finite() && !values[n].is_finite();
        if spread.abs() <= options.f_tolerance || both_infinite || diameter(&simplex) <= X_TOLERANCE {
            return Pass {
                x: simplex[0].clone(),
                fx: values[0],
                used,
                collapsed: true,
            };
        }
        if used >= budget {
            return Pass {
                x: simplex[0].clone(),
                fx: values[0],
                used,
                collapsed: false,
            };
        }

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
            .collect();
        let worst = simplex[n].clone();

        let reflected = project(&along(&centroid, &worst, coefficients.reflect), lower);
        let f_reflected = eval(&reflected);
        used += 1;

        if f_reflected < values[0] {
            let expanded = project(&along(&centroid, &worst, coefficients.expand), lower);
            let f_expanded = eval(&expanded);
            used += 1;
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        // outside contraction when the reflection helped at all
        let coef = if f_reflected < values[n] {
            coefficients.contract
        } else {
            -coefficients.contract
        };
        let contracted = project(&along(&centroid, &worst, coef), lower);
        let f_contracted = eval(&contracted);
        used += 1;

        if f_contracted < values[n].min(f_reflected) {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        let best = simplex[0].clone();
        for i in 1..=n {
            let shrunk: Vec<f64> = best
                .iter()
                .zip(&simplex[i])
                .map(|(b, v)| b + coefficients.shrink * (v - b))
                .collect();
            simplex[i] = project(&shrunk, lower);
            values[i] = eval(&simplex[i]);
            used += 1;
        }
    }
}

/// Gradient and Hessian over the coordinates away from their bounds
#[derive(Debug, Clone)]
pub struct Derivatives {
    /// Coordinates the derivatives refer to
    pub free: Vec<usize>,
    pub gradient: DVector<f64>,
    pub hessian: DMatrix<f64>,
    pub evaluations: usize,
}

/// Central-difference derivatives of `f` at `x`, given `fx = f(x)`
pub fn derivatives<F>(f: &mut F, x: &[f64], fx: f64, lower: &[f64]) -> Derivatives
where
    F: FnMut(&[f64]) -> f64,
{
    let h = DIFFERENCE_STEP;
    let mut evaluations = 0;
    let mut at = |x: &[f64], moves: &[(usize, f64)]| {
        let mut y = x.to_vec();
        for &(i, d) in moves {
            y[i] += d;
        }
        evaluations += 1;
        finite_or_inf(f(&y))
    };

    // one-sided coordinates sit on (or next to) their bound
    let mut free = Vec::new();
    let mut grad = Vec::new();
    let mut diag = Vec::new();
    for i in 0..x.len() {
        if x[i] - h < lower[i] {
            continue;
        }
        let fp = at(x, &[(i, h)]);
        let fm = at(x, &[(i, -h)]);
        if !fp.is_finite() || !fm.is_finite() {
            continue;
        }
        free.push(i);
        grad.push((fp - fm) / (2.0 * h));
        diag.push((fp - 2.0 * fx + fm) / (h * h));
    }

    let k = free.len();
    let mut hessian = DMatrix::from_diagonal(&DVector::from_vec(diag));
    for a in 0..k {
        for b in (a + 1)..k {
            let (i, j) = (free[a], free[b]);
            let fpp = at(x, &[(i, h), (j, h)]);
            let fpm = at(x, &[(i, h), (j, -h)]);
            let fmp = at(x, &[(i, -h), (j, h)]);
            let fmm = at(x, &[(i, -h), (j, -h)]);
            let v = (fpp - fpm - fmp + fmm) / (4.0 * h * h);
            let v = if v.is_finite() { v } else { 0.0 };
            hessian[(a, b)] = v;
            hessian[(b, a)] = v;
        }
    }

    Derivatives {
        free,
        gradient: DVector::from_vec(grad),
        hessian,
        evaluations,
    }
}

/// Projected Newton steps from `x`, damped until the Hessian is positive definite
fn newton_polish<F>(f: &mut F, x: &[f64], fx: f64, lower: &[f64], options: NelderMeadOptions) -> Minimum
where
    F: FnMut(&[f64]) -> f64,
{
    let mut x = x.to_vec();
    let mut fx = fx;
    let mut evaluations = 0;
    let mut converged = false;

    if x.is_empty() || !fx.is_finite() {
        return Minimum {
            x,
            fx,
            evaluations,
            converged,
        };
    }

    for _ in 0..MAX_NEWTON_STEPS {
        let d = derivatives(f, &x, fx, lower);
        evaluations += d.evaluations;
        if d.free.is_empty() {
            break;
        }

        let Some((step, exact)) = newton_direction(&d.hessian, &d.gradient) else {
            break;
        };
        // Newton decrement: predicted reduction of a full step
        let decrement = -0.5 * d.gradient.dot(&step);
        if exact && decrement.abs() <= options.f_tolerance {
            converged = true;
            break;
        }

        let mut t = 1.0;
        let mut accepted = false;
        for _ in 0..30 {
            let mut trial = x.clone();
            for (a, &i) in d.free.iter().enumerate() {
                trial[i] += t * step[a];
            }
            let trial = project(&trial, lower);
            let ft = finite_or_inf(f(&trial));
            evaluations += 1;
            if ft < fx {
                x = trial;
                fx = ft;
                accepted = true;
                break;
            }
            t *= 0.5;
        }
        if !accepted {
            // no descent left along the Newton direction
            converged = exact && decrement.abs() <= options.f_tolerance * 1e3;
            break;
        }
    }

    Minimum {
        x,
        fx,
        evaluations,
        converged,
    }
}

/// Solve `H s = -g`, adding a ridge when `H` is not positive definite.
/// The flag is false when a ridge was needed.
fn newton_direction(hessian: &DMatrix<f64>, gradient: &DVector<f64>) -> Option<(DVector<f64>, bool)> {
    let k = gradient.len();
    let scale = hessian
        .diagonal()
        .iter()
        .fold(0.0f64, |m, v| m.max(v.abs()))
        .max(1.0);
    let mut ridge = 0.0;
    for _ in 0..12 {
        let damped = hessian + DMatrix::identity(k, k) * ridge;
        if let Some(chol) = damped.cholesky() {
            return Some((-chol.solve(gradient), ridge == 0.0));
        }
        ridge = if ridge == 0.0 { scale * 1e-6 } else { ridge * 10.0 };
    }
    None
}

fn finite_or_inf(v: f64) -> f64 {
    if v.is_nan() {
        f64::INFINITY
    } else {
        v
    }
}

/// centroid + coef * (centroid - worst)
fn along(centroid: &[f64], worst: &[f64], coef: f64) -> Vec<f64> {
    centroid
        .iter()
        .zip(worst)
        .map(|(c, w)| c + coef * (c - w))
        .collect()
}

fn project(x: &[f64], lower: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(lower)
        .map(|(v, lo)| v.max(*lo))
        .collect()
}

/// Largest distance of a vertex from the best one, relative to its scale
fn diameter(simplex: &[Vec<f64>]) -> f64 {
    let best = &simplex[0];
    let scale = best.iter().fold(1.0f64, |m, v| m.max(v.abs()));
    simplex[1..]
        .iter()
        .map(|v| {
            v.iter()
                .zip(best)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f64, f64::max)
        })
        .fold(0.0f64, f64::max)
        / scale
}

fn order(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    *simplex = idx.iter().map(|&i| simplex[i].clone()).collect();
    *values = idx.iter().map(|&i| values[i]).collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_minimum() {
        let f = |x: &[f64]| (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2);
        let min = nelder_mead(f, &[0.0, 0.0], &[f64::NEG_INFINITY; 2], NelderMeadOptions::default());
        assert!(min.converged);
        assert!((min.x[0] - 3.0).abs() < 1e-3);
        assert!((min.x[1] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_rosenbrock() {
        let f = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let min = nelder_mead(
            f,
            &[-1.2, 1.0],
            &[f64::NEG_INFINITY; 2],
            NelderMeadOptions {
                f_tolerance: 1e-12,
                ..Default::default()
            },
        );
        assert!((min.x[0] - 1.0).abs() < 1e-2);
        assert!((min.x[1] - 1.0).abs() < 2e-2);
    }

    #[test]
    fn test_lower_bound_is_respected() {
        // unconstrained minimum at -2, bound at 0
        let f = |x: &[f64]| (x[0] + 2.0).powi(2);
        let min = nelder_mead(f, &[1.0], &[0.0], NelderMeadOptions::default());
        assert!(min.x[0] >= 0.0);
        assert!(min.x[0] < 1e-3);
    }

    #[test]
    fn test_budget_exhaustion_is_not_converged() {
        let f = |x: &[f64]| x.iter().map(|v| (v - 5.0).powi(2)).sum::<f64>();
        let min = nelder_mead(
            f,
            &[0.0; 6],
            &[f64::NEG_INFINITY; 6],
            NelderMeadOptions {
                max_evaluations: 20,
                ..Default::default()
            },
        );
        assert!(!min.converged);
        assert!(min.evaluations <= 40);
    }

    #[test]
    fn test_adaptive_coefficients() {
        let low = Coefficients::adaptive(1);
        assert_eq!((low.expand, low.contract, low.shrink), (2.0, 0.5, 0.5));
        let high = Coefficients::adaptive(20);
        assert!((high.expand - 1.1).abs() < 1e-12);
        assert!((high.contract - 0.725).abs() < 1e-12);
        assert!((high.shrink - 0.95).abs() < 1e-12);
    }

    /// Ill-conditioned coupled quadratic in 20 dimensions, minimum at 1
    fn coupled_quadratic(x: &[f64]) -> f64 {
        let diag: f64 = x
            .iter()
            .enumerate()
            .map(|(i, v)| (i as f64 + 1.0) * (v - 1.0).powi(2))
            .sum();
        let coupling: f64 = x.windows(2).map(|w| 0.5 * (w[0] - 1.0) * (w[1] - 1.0)).sum();
        diag + coupling
    }

    #[test]
    fn test_minimize_converges_in_twenty_dimensions() {
        let min = minimize(
            coupled_quadratic,
            &[0.0; 20],
            &[f64::NEG_INFINITY; 20],
            NelderMeadOptions::default(),
        );
        assert!(min.converged);
        for v in &min.x {
            assert!((v - 1.0).abs() < 1e-4, "{:?}", min.x);
        }
    }

    #[test]
    fn test_polish_recovers_from_short_simplex_budget() {
        let min = minimize(
            coupled_quadratic,
            &[0.0; 20],
            &[f64::NEG_INFINITY; 20],
            NelderMeadOptions {
                max_evaluations: 200,
                ..Default::default()
            },
        );
        assert!(min.converged);
        assert!(min.fx < 1e-8);
    }

    #[test]
    fn test_minimize_keeps_bound_coordinates() {
        // minimum of the first coordinate lies below its bound
        let f = |x: &[f64]| (x[0] + 1.0).powi(2) + (x[1] - 2.0).powi(2) + x[0] * x[1] * 0.1;
        let min = minimize(f, &[1.0, 1.0], &[0.0, f64::NEG_INFINITY], NelderMeadOptions::default());
        assert!(min.x[0] >= 0.0 && min.x[0] < 1e-3);
        assert!((min.x[1] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_derivatives_skip_bound_coordinates() {
        let mut f = |x: &[f64]| x[0] * x[0] + 3.0 * x[1] * x[1] + x[0] * x[1];
        let x = [0.0, 1.0];
        let fx = f(&x);
        let d = derivatives(&mut f, &x, fx, &[0.0, f64::NEG_INFINITY]);
        assert_eq!(d.free, vec![1]);
        assert!((d.gradient[0] - 6.0).abs() < 1e-6);
        assert!((d.hessian[(0, 0)] - 6.0).abs() < 1e-4);
    }
}
