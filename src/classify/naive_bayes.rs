//! Gaussian, multinomial and Bernoulli naive Bayes.
//!
//! All three keep per-class log priors; a class without training rows gets a
//! `-inf` prior and therefore probability zero.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

use super::estimator::{Classifier, check_width, class_counts, softmax_rows};

fn log_priors(counts: &[usize]) -> Array1<f64> {
    let total: usize = counts.iter().sum();
    counts
        .iter()
        .map(|&c| {
            if c == 0 {
                f64::NEG_INFINITY
            } else {
                (c as f64 / total as f64).ln()
            }
        })
        .collect()
}

/// Sum the rows of `x` belonging to every class.
fn per_class_sums(x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Array2<f64> {
    let mut sums = Array2::zeros((n_classes, x.ncols()));
    for (row, &class) in x.axis_iter(Axis(0)).zip(y) {
        let mut target = sums.row_mut(class);
        target += &row;
    }
    sums
}

/// Add the class priors and mask absent classes before normalising.
fn finish(mut jll: Array2<f64>, priors: &Array1<f64>) -> Array2<f64> {
    for mut row in jll.axis_iter_mut(Axis(0)) {
        for (score, prior) in row.iter_mut().zip(priors) {
            *score = if prior.is_finite() {
                *score + prior
            } else {
                f64::NEG_INFINITY
            };
        }
    }
    softmax_rows(jll)
}

// ---------------------------------------------------------------------------
// Gaussian
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GaussianNbParams {
    /// Fraction of the largest feature variance added to every variance.
    pub var_smoothing: f64,
}

impl Default for GaussianNbParams {
    fn default() -> Self {
        Self {
            var_smoothing: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GaussianState {
    means: Array2<f64>,
    variances: Array2<f64>,
    log_priors: Array1<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNb {
    params: GaussianNbParams,
    state: Option<GaussianState>,
}

impl GaussianNb {
    pub fn new(params: GaussianNbParams) -> Self {
        Self { params, state: None }
    }

    pub fn params(&self) -> &GaussianNbParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }
}

impl Classifier for GaussianNb {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()> {
        let counts = class_counts(y, n_classes);
        let sums = per_class_sums(x, y, n_classes);

        let mut means = Array2::zeros((n_classes, x.ncols()));
        for (class, &count) in counts.iter().enumerate() {
            if count > 0 {
                let mean = &sums.row(class) / count as f64;
                means.row_mut(class).assign(&mean);
            }
        }

        let mut variances = Array2::zeros((n_classes, x.ncols()));
        for (row, &class) in x.axis_iter(Axis(0)).zip(y) {
            let diff = &row - &means.row(class);
            let mut target = variances.row_mut(class);
            target += &(&diff * &diff);
        }
        for (class, &count) in counts.iter().enumerate() {
            if count > 0 {
                variances.row_mut(class).mapv_inplace(|v| v / count as f64);
            }
        }

        let largest = x
            .var_axis(Axis(0), 0.0)
            .iter()
            .copied()
            .fold(0.0, f64::max);
        let epsilon = (self.params.var_smoothing * largest).max(f64::MIN_POSITIVE);
        variances.mapv_inplace(|v| v + epsilon);

        self.state = Some(GaussianState {
            means,
            variances,
            log_priors: log_priors(&counts),
        });
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or(ClassifierError::NotFitted("gaussian naive Bayes model"))?;
        check_width(state.means.ncols(), x)?;

        let n_classes = state.means.nrows();
        let mut jll = Array2::zeros((x.nrows(), n_classes));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            for class in 0..n_classes {
                let mean = state.means.row(class);
                let var = state.variances.row(class);
                let mut score = 0.0;
                for ((v, m), s) in row.iter().zip(mean).zip(var) {
                    score -= 0.5 * (2.0 * std::f64::consts::PI * s).ln();
                    score -= 0.5 * (v - m) * (v - m) / s;
                }
                jll[[i, class]] = score;
            }
        }
        Ok(finish(jll, &state.log_priors))
    }
}

// ---------------------------------------------------------------------------
// Multinomial
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultinomialNbParams {
    /// Additive (Laplace/Lidstone) smoothing.
    pub alpha: f64,
}

impl Default for MultinomialNbParams {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MultinomialState {
    feature_log_prob: Array2<f64>,
    log_priors: Array1<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultinomialNb {
    params: MultinomialNbParams,
    state: Option<MultinomialState>,
}

impl MultinomialNb {
    pub fn new(params: MultinomialNbParams) -> Self {
        Self { params, state: None }
    }

    pub fn params(&self) -> &MultinomialNbParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }
}

impl Classifier for MultinomialNb {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()> {
        if x.iter().any(|v| *v < 0.0) {
            return Err(ClassifierError::InvalidInput(
                "multinomial naive Bayes needs non-negative features".into(),
            ));
        }
        let counts = class_counts(y, n_classes);
        let mut smoothed = per_class_sums(x, y, n_classes);
        smoothed.mapv_inplace(|v| v + self.params.alpha);

        let mut feature_log_prob = Array2::zeros(smoothed.raw_dim());
        for (class, row) in smoothed.axis_iter(Axis(0)).enumerate() {
            let total = row.sum();
            feature_log_prob
                .row_mut(class)
                .assign(&row.mapv(|v| (v / total).ln()));
        }

        self.state = Some(MultinomialState {
            feature_log_prob,
            log_priors: log_priors(&counts),
        });
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or(ClassifierError::NotFitted("multinomial naive Bayes model"))?;
        check_width(state.feature_log_prob.ncols(), x)?;

        let jll = x.dot(&state.feature_log_prob.t());
        Ok(finish(jll, &state.log_priors))
    }
}

// ---------------------------------------------------------------------------
// Bernoulli
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BernoulliNbParams {
    pub alpha: f64,
    /// Features strictly above this value count as present.
    pub binarize: f64,
}

impl Default for BernoulliNbParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            binarize: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BernoulliState {
    log_present: Array2<f64>,
    log_absent: Array2<f64>,
    log_priors: Array1<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BernoulliNb {
    params: BernoulliNbParams,
    state: Option<BernoulliState>,
}

impl BernoulliNb {
    pub fn new(params: BernoulliNbParams) -> Self {
        Self { params, state: None }
    }

    pub fn params(&self) -> &BernoulliNbParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn binarized(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let threshold = self.params.binarize;
        x.mapv(|v| if v > threshold { 1.0 } else { 0.0 })
    }
}

impl Classifier for BernoulliNb {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()> {
        let binary = self.binarized(x);
        let counts = class_counts(y, n_classes);
        let present = per_class_sums(binary.view(), y, n_classes);
        let alpha = self.params.alpha;

        let mut log_present = Array2::zeros(present.raw_dim());
        let mut log_absent = Array2::zeros(present.raw_dim());
        for (class, &count) in counts.iter().enumerate() {
            let denom = count as f64 + 2.0 * alpha;
            for (feature, &seen) in present.row(class).iter().enumerate() {
                let p = if denom > 0.0 { (seen + alpha) / denom } else { 0.5 };
                log_present[[class, feature]] = p.ln();
                log_absent[[class, feature]] = (1.0 - p).ln();
            }
        }

        self.state = Some(BernoulliState {
            log_present,
            log_absent,
            log_priors: log_priors(&counts),
        });
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or(ClassifierError::NotFitted("Bernoulli naive Bayes model"))?;
        check_width(state.log_present.ncols(), x)?;

        let binary = self.binarized(x);
        let absent = binary.mapv(|v| 1.0 - v);
        let jll = binary.dot(&state.log_present.t()) + absent.dot(&state.log_absent.t());
        Ok(finish(jll, &state.log_priors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn word_counts() -> (Array2<f64>, Array1<usize>) {
        (
            array![
                [3.0, 0.0, 1.0],
                [2.0, 0.0, 0.0],
                [4.0, 1.0, 0.0],
                [0.0, 3.0, 1.0],
                [0.0, 2.0, 2.0],
                [1.0, 4.0, 0.0]
            ],
            array![0, 0, 0, 1, 1, 1],
        )
    }

    #[test]
    fn gaussian_separates_clusters() {
        let (x, y) = word_counts();
        let mut nb = GaussianNb::new(GaussianNbParams::default());
        nb.fit(x.view(), y.view(), 2).unwrap();
        let pred = nb.predict(array![[3.0, 0.5, 0.5], [0.5, 3.0, 1.0]].view()).unwrap();
        assert_eq!(pred.to_vec(), vec![0, 1]);
    }

    #[test]
    fn multinomial_probabilities_sum_to_one() {
        let (x, y) = word_counts();
        let mut nb = MultinomialNb::new(MultinomialNbParams::default());
        nb.fit(x.view(), y.view(), 2).unwrap();
        let proba = nb.predict_proba(array![[5.0, 0.0, 0.0], [0.0, 5.0, 0.0]].view()).unwrap();
        for row in proba.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!(proba[[0, 0]] > 0.9);
        assert!(proba[[1, 1]] > 0.9);
    }

    #[test]
    fn multinomial_rejects_negative_features() {
        let mut nb = MultinomialNb::new(MultinomialNbParams::default());
        let err = nb.fit(array![[-1.0]].view(), array![0].view(), 1).unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidInput(_)));
    }

    #[test]
    fn bernoulli_gives_absent_class_zero_probability() {
        let (x, y) = word_counts();
        let mut nb = BernoulliNb::new(BernoulliNbParams::default());
        nb.fit(x.view(), y.view(), 3).unwrap();
        let proba = nb.predict_proba(array![[1.0, 0.0, 1.0]].view()).unwrap();
        assert_eq!(proba[[0, 2]], 0.0);
        assert_eq!(nb.predict(array![[1.0, 0.0, 0.0]].view()).unwrap()[0], 0);
    }
}
