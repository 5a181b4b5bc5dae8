//! RBF-kernel support vector machine, one-vs-rest, trained with SMO.
//!
//! Each binary machine gets a Platt sigmoid fitted on its training decision
//! values; the per-class sigmoid outputs are normalized into a distribution.

use super::Estimator;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gamma {
    /// 1 / (n_features * variance of the training matrix)
    Scale,
    Value(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmParams {
    /// Soft-margin penalty
    pub c: f64,
    pub gamma: Gamma,
    /// KKT violation tolerance
    pub tol: f64,
    /// Consecutive sweeps without an update before stopping
    pub max_passes: usize,
    /// Hard cap on sweeps
    pub max_iter: usize,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            gamma: Gamma::Scale,
            tol: 1e-3,
            max_passes: 5,
            max_iter: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct BinaryMachine {
    /// Support vectors, one per row
    support: Array2<f64>,
    /// alpha_i * y_i per support vector
    coef: Vec<f64>,
    bias: f64,
    /// Platt sigmoid: P(class) = 1 / (1 + exp(a * f + b))
    platt_a: f64,
    platt_b: f64,
}

impl BinaryMachine {
    fn decision(&self, x: ArrayView1<'_, f64>, gamma: f64) -> f64 {
        self.support
            .rows()
            .into_iter()
            .zip(&self.coef)
            .map(|(sv, c)| c * rbf(sv, x, gamma))
            .sum::<f64>()
            + self.bias
    }

    fn probability(&self, x: ArrayView1<'_, f64>, gamma: f64) -> f64 {
        sigmoid_predict(self.decision(x, gamma), self.platt_a, self.platt_b)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelSvm {
    params: SvmParams,
    gamma: f64,
    n_classes: usize,
    machines: Vec<BinaryMachine>,
}

impl KernelSvm {
    pub fn new(params: SvmParams) -> Self {
        Self {
            params,
            gamma: 1.0,
            n_classes: 0,
            machines: Vec::new(),
        }
    }

    pub fn n_support(&self) -> usize {
        self.machines.iter().map(|m| m.coef.len()).sum()
    }

    pub fn params(&self) -> &SvmParams {
        &self.params
    }
}

fn rbf(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>, gamma: f64) -> f64 {
    let sq: f64 = a.iter().zip(b.iter()).map(|(p, q)| (p - q) * (p - q)).sum();
    (-gamma * sq).exp()
}

fn resolve_gamma(gamma: Gamma, x: ArrayView2<'_, f64>) -> f64 {
    match gamma {
        Gamma::Value(g) => g,
        Gamma::Scale => {
            let var = x.var(0.0);
            if x.ncols() == 0 || var <= 0.0 {
                1.0
            } else {
                1.0 / (x.ncols() as f64 * var)
            }
        }
    }
}

/// Sequential minimal optimization over a precomputed kernel matrix.
/// Returns (alphas, bias) for targets in {-1, +1}.
fn smo(kernel: &Array2<f64>, y: &[f64], params: &SvmParams) -> (Vec<f64>, f64) {
    let n = y.len();
    let c = params.c;
    let mut alpha = vec![0.0; n];
    let mut bias = 0.0;
    // error cache: f(x_k) - y_k
    let mut errors: Vec<f64> = y.iter().map(|t| -t).collect();

    let mut passes = 0;
    let mut iter = 0;
    while passes < params.max_passes && iter < params.max_iter {
        let mut changed = 0;
        for i in 0..n {
            let e_i = errors[i];
            let r_i = y[i] * e_i;
            let violates = (r_i < -params.tol && alpha[i] < c) || (r_i > params.tol && alpha[i] > 0.0);
            if !violates {
                continue;
            }

            // second choice: largest step |E_i - E_j|
            let j = (0..n)
                .filter(|&j| j != i)
                .max_by(|&a, &b| (e_i - errors[a]).abs().total_cmp(&(e_i - errors[b]).abs()));
            let Some(j) = j else { continue };
            let e_j = errors[j];

            let (alpha_i, alpha_j) = (alpha[i], alpha[j]);
            let (lo, hi) = if y[i] != y[j] {
                ((alpha_j - alpha_i).max(0.0), (c + alpha_j - alpha_i).min(c))
            } else {
                ((alpha_i + alpha_j - c).max(0.0), (alpha_i + alpha_j).min(c))
            };
            if lo >= hi {
                continue;
            }

            let eta = 2.0 * kernel[[i, j]] - kernel[[i, i]] - kernel[[j, j]];
            if eta >= 0.0 {
                continue;
            }

            let new_j = (alpha_j - y[j] * (e_i - e_j) / eta).clamp(lo, hi);
            if (new_j - alpha_j).abs() < 1e-5 {
                continue;
            }
            let new_i = alpha_i + y[i] * y[j] * (alpha_j - new_j);

            let d_i = y[i] * (new_i - alpha_i);
            let d_j = y[j] * (new_j - alpha_j);
            let b1 = bias - e_i - d_i * kernel[[i, i]] - d_j * kernel[[i, j]];
            let b2 = bias - e_j - d_i * kernel[[i, j]] - d_j * kernel[[j, j]];
            let new_bias = if new_i > 0.0 && new_i < c {
                b1
            } else if new_j > 0.0 && new_j < c {
                b2
            } else {
                (b1 + b2) / 2.0
            };

            for (k, e) in errors.iter_mut().enumerate() {
                *e += d_i * kernel[[i, k]] + d_j * kernel[[j, k]] + (new_bias - bias);
            }
            alpha[i] = new_i;
            alpha[j] = new_j;
            bias = new_bias;
            changed += 1;
        }

        if changed == 0 {
            passes += 1;
        } else {
            passes = 0;
        }
        iter += 1;
    }

    if iter >= params.max_iter {
        tracing::debug!("SMO stopped at iteration cap ({})", params.max_iter);
    }

    (alpha, bias)
}

fn sigmoid_predict(decision: f64, a: f64, b: f64) -> f64 {
    let f = decision * a + b;
    if f >= 0.0 {
        (-f).exp() / (1.0 + (-f).exp())
    } else {
        1.0 / (1.0 + f.exp())
    }
}

/// Platt scaling, Newton method with backtracking (Lin, Lin & Weng).
/// Returns (A, B).
fn fit_platt(decisions: &[f64], positive: &[bool]) -> (f64, f64) {
    const MAX_ITER: usize = 100;
    const MIN_STEP: f64 = 1e-10;
    const SIGMA: f64 = 1e-12;
    const EPS: f64 = 1e-5;

    let prior1 = positive.iter().filter(|&&p| p).count() as f64;
    let prior0 = positive.len() as f64 - prior1;
    let hi = (prior1 + 1.0) / (prior1 + 2.0);
    let lo = 1.0 / (prior0 + 2.0);
    let targets: Vec<f64> = positive.iter().map(|&p| if p { hi } else { lo }).collect();

    let objective = |a: f64, b: f64| -> f64 {
        decisions
            .iter()
            .zip(&targets)
            .map(|(d, t)| {
                let f = d * a + b;
                if f >= 0.0 {
                    t * f + (1.0 + (-f).exp()).ln()
                } else {
                    (t - 1.0) * f + (1.0 + f.exp()).ln()
                }
            })
            .sum()
    };

    let mut a = 0.0;
    let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
    let mut fval = objective(a, b);

    for _ in 0..MAX_ITER {
        let (mut h11, mut h22, mut h21) = (SIGMA, SIGMA, 0.0);
        let (mut g1, mut g2) = (0.0, 0.0);
        for (d, t) in decisions.iter().zip(&targets) {
            let f = d * a + b;
            let (p, q) = if f >= 0.0 {
                ((-f).exp() / (1.0 + (-f).exp()), 1.0 / (1.0 + (-f).exp()))
            } else {
                (1.0 / (1.0 + f.exp()), f.exp() / (1.0 + f.exp()))
            };
            let d2 = p * q;
            h11 += d * d * d2;
            h22 += d2;
            h21 += d * d2;
            let d1 = t - p;
            g1 += d * d1;
            g2 += d1;
        }

        if g1.abs() < EPS && g2.abs() < EPS {
            break;
        }

        let det = h11 * h22 - h21 * h21;
        let da = -(h22 * g1 - h21 * g2) / det;
        let db = -(-h21 * g1 + h11 * g2) / det;
        let gd = g1 * da + g2 * db;

        let mut step = 1.0;
        while step >= MIN_STEP {
            let (na, nb) = (a + step * da, b + step * db);
            let nf = objective(na, nb);
            if nf < fval + 1e-4 * step * gd {
                a = na;
                b = nb;
                fval = nf;
                break;
            }
            step /= 2.0;
        }
        if step < MIN_STEP {
            break;
        }
    }

    (a, b)
}

impl Estimator for KernelSvm {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) {
        let _span = tracing::debug_span!("svm_fit", classes = n_classes).entered();

        let n = x.nrows();
        self.n_classes = n_classes;
        self.gamma = resolve_gamma(self.params.gamma, x);
        self.machines.clear();

        if n_classes < 2 {
            return;
        }

        let mut kernel = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let k = rbf(x.row(i), x.row(j), self.gamma);
                kernel[[i, j]] = k;
                kernel[[j, i]] = k;
            }
        }

        for class in 0..n_classes {
            let positive: Vec<bool> = y.iter().map(|&c| c == class).collect();
            let targets: Vec<f64> = positive.iter().map(|&p| if p { 1.0 } else { -1.0 }).collect();
            let (alpha, bias) = smo(&kernel, &targets, &self.params);

            let support_idx: Vec<usize> = (0..n).filter(|&i| alpha[i] > 1e-8).collect();
            let coef: Vec<f64> = support_idx.iter().map(|&i| alpha[i] * targets[i]).collect();
            let support = x.select(ndarray::Axis(0), &support_idx);

            let decisions: Vec<f64> = (0..n)
                .map(|k| {
                    support_idx
                        .iter()
                        .zip(&coef)
                        .map(|(&i, c)| c * kernel[[i, k]])
                        .sum::<f64>()
                        + bias
                })
                .collect();
            let (platt_a, platt_b) = fit_platt(&decisions, &positive);

            tracing::debug!(
                "class {}: {} support vectors, platt=({:.3}, {:.3})",
                class,
                support_idx.len(),
                platt_a,
                platt_b
            );

            self.machines.push(BinaryMachine {
                support,
                coef,
                bias,
                platt_a,
                platt_b,
            });
        }
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        if self.n_classes != n_classes {
            return Err(format!("svm has {} classes, expected {}", self.n_classes, n_classes));
        }
        if !self.gamma.is_finite() {
            return Err("svm gamma is not finite".to_string());
        }
        let expected_machines = if n_classes < 2 { 0 } else { n_classes };
        if self.machines.len() != expected_machines {
            return Err(format!(
                "svm has {} machines, expected {}",
                self.machines.len(),
                expected_machines
            ));
        }
        for (k, machine) in self.machines.iter().enumerate() {
            if machine.support.nrows() > 0 && machine.support.ncols() != n_features {
                return Err(format!(
                    "machine {} support vectors have {} features, expected {}",
                    k,
                    machine.support.ncols(),
                    n_features
                ));
            }
            if machine.coef.len() != machine.support.nrows() {
                return Err(format!(
                    "machine {} has {} coefficients for {} support vectors",
                    k,
                    machine.coef.len(),
                    machine.support.nrows()
                ));
            }
        }
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        if self.n_classes == 1 {
            return Array1::ones(1);
        }
        if self.machines.is_empty() {
            return Array1::zeros(self.n_classes);
        }

        let raw = Array1::from_iter(self.machines.iter().map(|m| m.probability(x, self.gamma)));
        let total = raw.sum();
        if total > 0.0 {
            raw / total
        } else {
            Array1::from_elem(self.n_classes, 1.0 / self.n_classes as f64)
        }
    }
}
