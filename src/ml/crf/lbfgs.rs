// ============================================================
// Layer 5 — L-BFGS / OWL-QN Optimiser
// ============================================================
// Minimises  F(w) = f(w) + c1 · ||w||₁  for a smooth f with a
// known gradient.
//
// With c1 = 0 this is plain limited-memory BFGS. With c1 > 0 the
// Orthant-Wise variant (Andrew & Gao, 2007) is used:
//
//   1. pseudo-gradient ◇F replaces ∇f (one-sided derivative of
//      the L1 term at zero)
//   2. direction d = -H · ◇F from the two-loop recursion,
//      zeroed where it disagrees in sign with -◇F
//   3. every line-search trial point is projected back onto the
//      orthant chosen at the start of the iteration
//
// Curvature pairs (s, y) always come from the smooth gradient.
// Stops on ||◇F|| / max(1, ||w||) < epsilon, on max_iterations,
// or when backtracking cannot find sufficient decrease.

use std::collections::VecDeque;

use tracing::debug;

/// Armijo sufficient-decrease constant
const FTOL: f64 = 1e-4;
const MAX_LINESEARCH: usize = 40;

#[derive(Debug, Clone, PartialEq)]
pub struct LbfgsParams {
    pub c1:             f64,
    pub max_iterations: usize,
    pub epsilon:        f64,
    pub history:        usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Converged,
    MaxIterations,
    LineSearchFailed,
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x:          Vec<f64>,
    /// Objective including the L1 term
    pub value:      f64,
    pub iterations: usize,
    pub reason:     StopReason,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn l1(a: &[f64]) -> f64 {
    a.iter().map(|v| v.abs()).sum()
}

/// -1, 0 or 1 (`f64::signum` maps 0.0 to 1.0)
fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn pseudo_gradient(x: &[f64], g: &[f64], c1: f64) -> Vec<f64> {
    if c1 == 0.0 {
        return g.to_vec();
    }
    x.iter()
        .zip(g)
        .map(|(&xi, &gi)| {
            if xi < 0.0 {
                gi - c1
            } else if xi > 0.0 {
                gi + c1
            } else if gi + c1 < 0.0 {
                gi + c1
            } else if gi - c1 > 0.0 {
                gi - c1
            } else {
                0.0
            }
        })
        .collect()
}

/// d = -H · pg via the two-loop recursion over the stored pairs.
fn two_loop(pg: &[f64], pairs: &VecDeque<(Vec<f64>, Vec<f64>, f64)>) -> Vec<f64> {
    let mut q = pg.to_vec();
    let mut alphas = Vec::with_capacity(pairs.len());

    for (s, y, rho) in pairs.iter().rev() {
        let a = rho * dot(s, &q);
        for (qi, yi) in q.iter_mut().zip(y) {
            *qi -= a * yi;
        }
        alphas.push(a);
    }

    if let Some((s, y, _)) = pairs.back() {
        let gamma = dot(s, y) / dot(y, y);
        for qi in q.iter_mut() {
            *qi *= gamma;
        }
    }

    for ((s, y, rho), a) in pairs.iter().zip(alphas.iter().rev()) {
        let b = rho * dot(y, &q);
        for (qi, si) in q.iter_mut().zip(s) {
            *qi += si * (a - b);
        }
    }

    q.iter().map(|v| -v).collect()
}

/// Minimise `f` from `x0`.
///
/// `f(x, grad)` must return the smooth objective at `x` and write its
/// gradient into `grad`.
pub fn minimize<F>(x0: Vec<f64>, params: &LbfgsParams, mut f: F) -> Minimum
where
    F: FnMut(&[f64], &mut [f64]) -> f64,
{
    let n = x0.len();
    let c1 = params.c1;
    let mut x = x0;
    let mut g = vec![0.0; n];
    let mut fx = f(&x, &mut g) + c1 * l1(&x);
    let mut pairs: VecDeque<(Vec<f64>, Vec<f64>, f64)> = VecDeque::with_capacity(params.history);

    let mut iterations = 0usize;
    let reason = loop {
        let pg = pseudo_gradient(&x, &g, c1);
        let pg_norm = norm(&pg);
        if n == 0 || pg_norm / norm(&x).max(1.0) < params.epsilon {
            break StopReason::Converged;
        }
        if iterations >= params.max_iterations {
            break StopReason::MaxIterations;
        }

        let mut d = two_loop(&pg, &pairs);
        if c1 > 0.0 {
            for (di, pi) in d.iter_mut().zip(&pg) {
                if *di * *pi >= 0.0 {
                    *di = 0.0;
                }
            }
        }
        if dot(&d, &pg) >= 0.0 {
            // Not a descent direction: restart from steepest descent
            pairs.clear();
            d = pg.iter().map(|v| -v).collect();
        }

        let orthant: Vec<f64> = x
            .iter()
            .zip(&pg)
            .map(|(&xi, &pi)| if xi != 0.0 { sign(xi) } else { -sign(pi) })
            .collect();

        let mut step = if pairs.is_empty() { 1.0 / pg_norm } else { 1.0 };
        let mut accepted = None;
        let mut g_new = vec![0.0; n];
        for _ in 0..MAX_LINESEARCH {
            let mut x_new: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi + step * di).collect();
            if c1 > 0.0 {
                for (xi, oi) in x_new.iter_mut().zip(&orthant) {
                    if sign(*xi) != *oi {
                        *xi = 0.0;
                    }
                }
            }
            let f_new = f(&x_new, &mut g_new) + c1 * l1(&x_new);
            let decrease: f64 = pg.iter().zip(x_new.iter().zip(&x)).map(|(p, (a, b))| p * (a - b)).sum();
            if f_new.is_finite() && f_new <= fx + FTOL * decrease {
                accepted = Some((x_new, f_new));
                break;
            }
            step *= 0.5;
        }

        let Some((x_new, f_new)) = accepted else {
            break StopReason::LineSearchFailed;
        };

        let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
        let sy = dot(&s, &y);
        if sy > 1e-10 {
            if pairs.len() == params.history.max(1) {
                pairs.pop_front();
            }
            pairs.push_back((s, y, 1.0 / sy));
        }

        x = x_new;
        g.copy_from_slice(&g_new);
        iterations += 1;
        debug!(iteration = iterations, loss = f_new, step, "lbfgs");
        fx = f_new;
    };

    Minimum { x, value: fx, iterations, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(c1: f64) -> LbfgsParams {
        LbfgsParams { c1, max_iterations: 200, epsilon: 1e-8, history: 6 }
    }

    /// f(x) = Σ a_i (x_i - b_i)²
    fn quadratic(a: Vec<f64>, b: Vec<f64>) -> impl FnMut(&[f64], &mut [f64]) -> f64 {
        move |x: &[f64], g: &mut [f64]| {
            let mut v = 0.0;
            for i in 0..x.len() {
                let r = x[i] - b[i];
                v += a[i] * r * r;
                g[i] = 2.0 * a[i] * r;
            }
            v
        }
    }

    #[test]
    fn test_smooth_quadratic_minimum() {
        let m = minimize(vec![0.0; 3], &params(0.0), quadratic(vec![1.0, 4.0, 0.5], vec![1.0, -2.0, 3.0]));
        for (xi, bi) in m.x.iter().zip([1.0, -2.0, 3.0]) {
            assert!((xi - bi).abs() < 1e-5, "{xi} vs {bi}");
        }
        assert_ne!(m.reason, StopReason::MaxIterations);
    }

    #[test]
    fn test_rosenbrock() {
        let rosen = |x: &[f64], g: &mut [f64]| {
            let (a, b) = (x[0], x[1]);
            g[0] = -2.0 * (1.0 - a) - 400.0 * a * (b - a * a);
            g[1] = 200.0 * (b - a * a);
            (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2)
        };
        let m = minimize(vec![-1.2, 1.0], &params(0.0), rosen);
        assert!((m.x[0] - 1.0).abs() < 1e-3);
        assert!((m.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_l1_soft_thresholds() {
        // min (x - b)² + c1 |x|  →  x* = sign(b) · max(|b| - c1/2, 0)
        let b = vec![2.0, 0.3, -1.0];
        let m = minimize(vec![0.0; 3], &params(1.0), quadratic(vec![1.0; 3], b));
        assert!((m.x[0] - 1.5).abs() < 1e-4);
        assert_eq!(m.x[1], 0.0);
        assert!((m.x[2] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_respects_max_iterations() {
        let p = LbfgsParams { max_iterations: 1, ..params(0.0) };
        let m = minimize(vec![-1.2, 1.0], &p, |x: &[f64], g: &mut [f64]| {
            g[0] = 4.0 * x[0].powi(3);
            g[1] = 2.0 * x[1];
            x[0].powi(4) + x[1] * x[1]
        });
        assert!(m.iterations <= 1);
    }

    #[test]
    fn test_zero_dimensional_problem() {
        let m = minimize(Vec::new(), &params(0.1), |_: &[f64], _: &mut [f64]| 3.0);
        assert_eq!(m.reason, StopReason::Converged);
        assert_eq!(m.value, 3.0);
    }
}
