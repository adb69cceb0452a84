//! Kernel support vector classifier trained with simplified SMO.
//!
//! Two classes use a single machine and a logistic link on its decision
//! value. More classes use one machine per class (one-vs-rest) and a softmax
//! over the decision values.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

use super::estimator::{Classifier, check_width, class_counts, softmax_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    Linear,
    Poly,
    Rbf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SvmParams {
    /// Inverse regularisation strength.
    #[serde(rename = "C")]
    pub c: f64,
    pub kernel: Kernel,
    pub degree: u32,
    /// Kernel coefficient; `None` means `1 / (n_features * var(X))`.
    pub gamma: Option<f64>,
    pub coef0: f64,
    pub tol: f64,
    /// Sweeps without any update before training stops.
    pub max_passes: usize,
    pub max_iter: usize,
    pub random_state: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: Kernel::Rbf,
            degree: 3,
            gamma: None,
            coef0: 0.0,
            tol: 1e-3,
            max_passes: 5,
            max_iter: 200,
            random_state: 6240,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct KernelFn {
    kernel: Kernel,
    gamma: f64,
    coef0: f64,
    degree: u32,
}

impl KernelFn {
    fn eval(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.kernel {
            Kernel::Linear => a.dot(&b),
            Kernel::Poly => (self.gamma * a.dot(&b) + self.coef0).powi(self.degree as i32),
            Kernel::Rbf => {
                let dist: f64 = a.iter().zip(b).map(|(u, v)| (u - v) * (u - v)).sum();
                (-self.gamma * dist).exp()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Machine {
    /// `alpha * y` for every support row.
    coef: Vec<f64>,
    intercept: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SvmState {
    kernel: KernelFn,
    support: Array2<f64>,
    /// One machine for a binary problem, one per class otherwise; classes
    /// without training rows have no machine.
    machines: Vec<Option<Machine>>,
    n_classes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmClassifier {
    params: SvmParams,
    state: Option<SvmState>,
}

impl SvmClassifier {
    pub fn new(params: SvmParams) -> Self {
        Self { params, state: None }
    }

    pub fn params(&self) -> &SvmParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    #[cfg(test)]
    pub fn n_support(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.support.nrows())
    }

    fn scale_gamma(x: ArrayView2<f64>) -> f64 {
        let mean = x.mean().unwrap_or(0.0);
        let var = x.mapv(|v| (v - mean) * (v - mean)).mean().unwrap_or(0.0);
        if var > 0.0 {
            1.0 / (x.ncols() as f64 * var)
        } else {
            1.0
        }
    }

    /// Dual coefficients of one binary machine on the precomputed kernel.
    fn smo(&self, gram: &Array2<f64>, labels: &[f64], rng: &mut StdRng) -> (Vec<f64>, f64) {
        let n = labels.len();
        let c = self.params.c;
        let tol = self.params.tol;
        let mut alpha = vec![0.0; n];
        let mut b = 0.0;
        if n < 2 {
            return (alpha, b);
        }

        let output = |alpha: &[f64], b: f64, i: usize| -> f64 {
            alpha
                .iter()
                .zip(labels)
                .enumerate()
                .filter(|(_, (a, _))| **a > 0.0)
                .map(|(j, (a, y))| a * y * gram[[j, i]])
                .sum::<f64>()
                + b
        };

        let mut passes = 0;
        let mut iter = 0;
        while passes < self.params.max_passes && iter < self.params.max_iter {
            let mut changed = 0;
            for i in 0..n {
                let err_i = output(&alpha, b, i) - labels[i];
                let violates = (labels[i] * err_i < -tol && alpha[i] < c)
                    || (labels[i] * err_i > tol && alpha[i] > 0.0);
                if !violates {
                    continue;
                }

                let mut j = rng.gen_range(0..n - 1);
                if j >= i {
                    j += 1;
                }
                let err_j = output(&alpha, b, j) - labels[j];
                let (old_i, old_j) = (alpha[i], alpha[j]);
                let (low, high) = if labels[i] != labels[j] {
                    ((old_j - old_i).max(0.0), (c + old_j - old_i).min(c))
                } else {
                    ((old_i + old_j - c).max(0.0), (old_i + old_j).min(c))
                };
                if low >= high {
                    continue;
                }
                let eta = 2.0 * gram[[i, j]] - gram[[i, i]] - gram[[j, j]];
                if eta >= 0.0 {
                    continue;
                }

                let new_j = (old_j - labels[j] * (err_i - err_j) / eta).clamp(low, high);
                if (new_j - old_j).abs() < 1e-5 {
                    continue;
                }
                let new_i = old_i + labels[i] * labels[j] * (old_j - new_j);
                alpha[i] = new_i;
                alpha[j] = new_j;

                let b1 = b
                    - err_i
                    - labels[i] * (new_i - old_i) * gram[[i, i]]
                    - labels[j] * (new_j - old_j) * gram[[i, j]];
                let b2 = b
                    - err_j
                    - labels[i] * (new_i - old_i) * gram[[i, j]]
                    - labels[j] * (new_j - old_j) * gram[[j, j]];
                b = if new_i > 0.0 && new_i < c {
                    b1
                } else if new_j > 0.0 && new_j < c {
                    b2
                } else {
                    (b1 + b2) / 2.0
                };
                changed += 1;
            }
            iter += 1;
            passes = if changed == 0 { passes + 1 } else { 0 };
        }
        (alpha, b)
    }
}

impl Classifier for SvmClassifier {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()> {
        if self.params.c <= 0.0 {
            return Err(ClassifierError::InvalidInput("C must be positive".into()));
        }
        let kernel = KernelFn {
            kernel: self.params.kernel,
            gamma: self.params.gamma.unwrap_or_else(|| Self::scale_gamma(x)),
            coef0: self.params.coef0,
            degree: self.params.degree,
        };
        let n = x.nrows();
        let mut gram = Array2::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let k = kernel.eval(x.row(i), x.row(j));
                gram[[i, j]] = k;
                gram[[j, i]] = k;
            }
        }

        let counts = class_counts(y, n_classes);
        let positives: Vec<Option<usize>> = if n_classes == 2 && counts.iter().all(|c| *c > 0) {
            vec![Some(1)]
        } else {
            (0..n_classes)
                .map(|class| (counts[class] > 0).then_some(class))
                .collect()
        };

        let mut rng = StdRng::seed_from_u64(self.params.random_state);
        let mut duals = Vec::with_capacity(positives.len());
        for positive in &positives {
            duals.push(positive.map(|class| {
                let labels: Vec<f64> = y
                    .iter()
                    .map(|&t| if t == class { 1.0 } else { -1.0 })
                    .collect();
                let (alpha, b) = self.smo(&gram, &labels, &mut rng);
                let coef: Vec<f64> = alpha.iter().zip(&labels).map(|(a, l)| a * l).collect();
                (coef, b)
            }));
        }

        let support_rows: Vec<usize> = (0..n)
            .filter(|&row| duals.iter().flatten().any(|(coef, _)| coef[row] != 0.0))
            .collect();
        let machines = duals
            .into_iter()
            .map(|dual| {
                dual.map(|(coef, intercept)| Machine {
                    coef: support_rows.iter().map(|&row| coef[row]).collect(),
                    intercept,
                })
            })
            .collect();

        self.state = Some(SvmState {
            kernel,
            support: x.select(Axis(0), &support_rows),
            machines,
            n_classes,
        });
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or(ClassifierError::NotFitted("support vector classifier"))?;
        check_width(state.support.ncols(), x)?;

        let mut scores = Array2::from_elem((x.nrows(), state.machines.len()), f64::NEG_INFINITY);
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let k: Vec<f64> = state
                .support
                .axis_iter(Axis(0))
                .map(|sv| state.kernel.eval(row, sv))
                .collect();
            for (m, machine) in state.machines.iter().enumerate() {
                if let Some(machine) = machine {
                    let decision: f64 =
                        machine.coef.iter().zip(&k).map(|(c, k)| c * k).sum::<f64>()
                            + machine.intercept;
                    scores[[i, m]] = decision;
                }
            }
        }

        if state.machines.len() == 1 && state.n_classes == 2 {
            let mut proba = Array2::zeros((x.nrows(), 2));
            for (i, decision) in scores.column(0).iter().enumerate() {
                let positive = 1.0 / (1.0 + (-decision).exp());
                proba[[i, 0]] = 1.0 - positive;
                proba[[i, 1]] = positive;
            }
            return Ok(proba);
        }
        Ok(softmax_rows(scores))
    }
}
