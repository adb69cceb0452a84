use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

use super::algorithm::{Algorithm, ModelParams};
use super::forest::RandomForestClassifier;
use super::knn::KnnClassifier;
use super::mlp::MlpClassifier;
use super::naive_bayes::{BernoulliNb, GaussianNb, MultinomialNb};
use super::svm::SvmClassifier;
use super::tree::DecisionTreeClassifier;

// ---------------------------------------------------------------------------
// Classifier contract
// ---------------------------------------------------------------------------

/// A probabilistic classifier over dense feature rows.
///
/// Targets are class ids in `0..n_classes`; probability matrices always have
/// `n_classes` columns, even when a class is absent from the training rows.
pub trait Classifier {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()>;

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<usize>> {
        Ok(argmax_rows(&self.predict_proba(x)?))
    }
}

// ---------------------------------------------------------------------------
// Estimator: the persisted, algorithm-erased classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    Knn(KnnClassifier),
    Svm(SvmClassifier),
    Tree(DecisionTreeClassifier),
    Forest(RandomForestClassifier),
    Mlp(MlpClassifier),
    GaussianNb(GaussianNb),
    MultinomialNb(MultinomialNb),
    BernoulliNb(BernoulliNb),
}

impl Estimator {
    /// Unfitted estimator configured with `params`.
    pub fn from_params(params: &ModelParams) -> Self {
        match params {
            ModelParams::Knn(p) => Estimator::Knn(KnnClassifier::new(p.clone())),
            ModelParams::Svm(p) => Estimator::Svm(SvmClassifier::new(p.clone())),
            ModelParams::Tree(p) => Estimator::Tree(DecisionTreeClassifier::new(p.clone())),
            ModelParams::Forest(p) => Estimator::Forest(RandomForestClassifier::new(p.clone())),
            ModelParams::Mlp(p) => Estimator::Mlp(MlpClassifier::new(p.clone())),
            ModelParams::GaussianNb(p) => Estimator::GaussianNb(GaussianNb::new(p.clone())),
            ModelParams::MultinomialNb(p) => Estimator::MultinomialNb(MultinomialNb::new(p.clone())),
            ModelParams::BernoulliNb(p) => Estimator::BernoulliNb(BernoulliNb::new(p.clone())),
        }
    }

    pub fn params(&self) -> ModelParams {
        match self {
            Estimator::Knn(m) => ModelParams::Knn(m.params().clone()),
            Estimator::Svm(m) => ModelParams::Svm(m.params().clone()),
            Estimator::Tree(m) => ModelParams::Tree(m.params().clone()),
            Estimator::Forest(m) => ModelParams::Forest(m.params().clone()),
            Estimator::Mlp(m) => ModelParams::Mlp(m.params().clone()),
            Estimator::GaussianNb(m) => ModelParams::GaussianNb(m.params().clone()),
            Estimator::MultinomialNb(m) => ModelParams::MultinomialNb(m.params().clone()),
            Estimator::BernoulliNb(m) => ModelParams::BernoulliNb(m.params().clone()),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.params().algorithm()
    }

    pub fn is_fitted(&self) -> bool {
        match self {
            Estimator::Knn(m) => m.is_fitted(),
            Estimator::Svm(m) => m.is_fitted(),
            Estimator::Tree(m) => m.is_fitted(),
            Estimator::Forest(m) => m.is_fitted(),
            Estimator::Mlp(m) => m.is_fitted(),
            Estimator::GaussianNb(m) => m.is_fitted(),
            Estimator::MultinomialNb(m) => m.is_fitted(),
            Estimator::BernoulliNb(m) => m.is_fitted(),
        }
    }

    fn as_classifier(&self) -> &dyn Classifier {
        match self {
            Estimator::Knn(m) => m,
            Estimator::Svm(m) => m,
            Estimator::Tree(m) => m,
            Estimator::Forest(m) => m,
            Estimator::Mlp(m) => m,
            Estimator::GaussianNb(m) => m,
            Estimator::MultinomialNb(m) => m,
            Estimator::BernoulliNb(m) => m,
        }
    }

    fn as_classifier_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Estimator::Knn(m) => m,
            Estimator::Svm(m) => m,
            Estimator::Tree(m) => m,
            Estimator::Forest(m) => m,
            Estimator::Mlp(m) => m,
            Estimator::GaussianNb(m) => m,
            Estimator::MultinomialNb(m) => m,
            Estimator::BernoulliNb(m) => m,
        }
    }
}

impl Classifier for Estimator {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()> {
        check_training_data(x, y, n_classes)?;
        self.as_classifier_mut().fit(x, y, n_classes)
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.as_classifier().predict_proba(x)
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Reject empty or misaligned training data and out-of-range targets.
pub fn check_training_data(x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ClassifierError::InvalidInput("empty training matrix".into()));
    }
    if x.nrows() != y.len() {
        return Err(ClassifierError::InvalidInput(format!(
            "{} rows but {} targets",
            x.nrows(),
            y.len()
        )));
    }
    if let Some(bad) = y.iter().find(|&&class| class >= n_classes) {
        return Err(ClassifierError::InvalidInput(format!(
            "target {bad} outside of {n_classes} classes"
        )));
    }
    Ok(())
}

/// Fail when prediction rows do not have the width seen during training.
pub fn check_width(expected: usize, x: ArrayView2<f64>) -> Result<()> {
    if x.ncols() == expected {
        Ok(())
    } else {
        Err(ClassifierError::InvalidInput(format!(
            "expected {expected} features, got {}",
            x.ncols()
        )))
    }
}

/// Index of the largest value of every row; the first one wins on ties.
pub fn argmax_rows(matrix: &Array2<f64>) -> Array1<usize> {
    matrix
        .axis_iter(Axis(0))
        .map(|row| {
            let mut best = 0;
            for (idx, value) in row.iter().enumerate() {
                if *value > row[best] {
                    best = idx;
                }
            }
            best
        })
        .collect()
}

/// Turn per-class log scores into row-normalised probabilities.
/// `-inf` scores (classes without training rows) get probability zero.
pub fn softmax_rows(mut scores: Array2<f64>) -> Array2<f64> {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            let uniform = 1.0 / row.len() as f64;
            row.fill(uniform);
            continue;
        }
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    scores
}

/// Number of training rows per class.
pub fn class_counts(y: ArrayView1<usize>, n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0; n_classes];
    for &class in y {
        counts[class] += 1;
    }
    counts
}
