//! Cross-validation: stratified folds, exhaustive grid search and learning
//! curves. Every score is plain accuracy.

use std::collections::BTreeMap;
use std::time::Instant;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{ClassifierError, Result};

use super::algorithm::ModelParams;
use super::estimator::{Classifier, Estimator};
use super::metrics::accuracy;

pub const DEFAULT_FOLDS: usize = 5;
const LEARNING_CURVE_STEPS: usize = 5;

/// `(train rows, test rows)` of one fold.
pub type Split = (Vec<usize>, Vec<usize>);

/// Population mean and standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

// ---------------------------------------------------------------------------
// Stratified k-fold
// ---------------------------------------------------------------------------

/// Folds that keep class proportions. Rows of each class are dealt to the
/// folds round-robin, continuing the rotation from one class to the next.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedKFold {
    n_splits: usize,
}

impl Default for StratifiedKFold {
    fn default() -> Self {
        Self::new(DEFAULT_FOLDS)
    }
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits }
    }

    pub fn split(&self, y: ArrayView1<usize>) -> Result<Vec<Split>> {
        let k = self.n_splits;
        if k < 2 {
            return Err(ClassifierError::InvalidInput(format!(
                "cross-validation needs at least 2 folds, got {k}"
            )));
        }
        if k > y.len() {
            return Err(ClassifierError::InvalidInput(format!(
                "cannot split {} samples into {k} folds",
                y.len()
            )));
        }

        let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, &class) in y.iter().enumerate() {
            by_class.entry(class).or_default().push(row);
        }
        if let Some(smallest) = by_class.values().map(Vec::len).min() {
            if smallest < k {
                log::warn!(
                    "the least populated class has only {smallest} members, fewer than the {k} folds"
                );
            }
        }

        let mut fold_of = vec![0; y.len()];
        let mut dealt = 0;
        for rows in by_class.values() {
            for &row in rows {
                fold_of[row] = dealt % k;
                dealt += 1;
            }
        }

        Ok((0..k)
            .map(|fold| {
                let (test, train): (Vec<usize>, Vec<usize>) =
                    (0..y.len()).partition(|&row| fold_of[row] == fold);
                (train, test)
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Cross-validated scoring
// ---------------------------------------------------------------------------

fn subset(
    x: ArrayView2<f64>,
    y: ArrayView1<usize>,
    rows: &[usize],
) -> (Array2<f64>, Array1<usize>) {
    (x.select(Axis(0), rows), y.select(Axis(0), rows))
}

/// Test-fold accuracy of `params` on every split.
pub fn cross_val_scores(
    params: &ModelParams,
    x: ArrayView2<f64>,
    y: ArrayView1<usize>,
    n_classes: usize,
    splits: &[Split],
) -> Result<Vec<f64>> {
    splits
        .iter()
        .map(|(train, test)| {
            let (x_train, y_train) = subset(x, y, train);
            let (x_test, y_test) = subset(x, y, test);
            let mut estimator = Estimator::from_params(params);
            estimator.fit(x_train.view(), y_train.view(), n_classes)?;
            let predicted = estimator.predict(x_test.view())?;
            Ok(accuracy(&y_test.to_vec(), &predicted.to_vec()))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub params: ModelParams,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Best candidate refitted on all rows.
    pub best_estimator: Estimator,
    pub best_params: ModelParams,
    pub best_score: f64,
    pub results: Vec<CandidateScore>,
}

/// Exhaustive search over a list of candidate configurations.
#[derive(Debug, Clone)]
pub struct GridSearch {
    candidates: Vec<ModelParams>,
    folds: StratifiedKFold,
}

impl GridSearch {
    pub fn new(candidates: Vec<ModelParams>, folds: StratifiedKFold) -> Self {
        Self { candidates, folds }
    }

    pub fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        n_classes: usize,
    ) -> Result<SearchOutcome> {
        if self.candidates.is_empty() {
            return Err(ClassifierError::InvalidInput(
                "grid search without candidates".into(),
            ));
        }
        let splits = self.folds.split(y)?;
        log::info!(
            "Fitting {} folds for each of {} candidates, totalling {} fits",
            splits.len(),
            self.candidates.len(),
            splits.len() * self.candidates.len()
        );

        let mut results = Vec::with_capacity(self.candidates.len());
        for params in &self.candidates {
            let scores = cross_val_scores(params, x, y, n_classes, &splits)?;
            let (mean, std) = mean_std(&scores);
            log::debug!("{mean:.3} (+/-{:.3}) for {}", std * 2.0, params.to_value());
            results.push(CandidateScore {
                params: params.clone(),
                mean,
                std,
            });
        }

        let mut best = 0;
        for (idx, candidate) in results.iter().enumerate() {
            if candidate.mean > results[best].mean {
                best = idx;
            }
        }
        let best_params = results[best].params.clone();
        let best_score = results[best].mean;

        let mut best_estimator = Estimator::from_params(&best_params);
        best_estimator.fit(x, y, n_classes)?;

        Ok(SearchOutcome {
            best_estimator,
            best_params,
            best_score,
            results,
        })
    }
}

// ---------------------------------------------------------------------------
// Learning curve
// ---------------------------------------------------------------------------

/// Scores per training-set size; inner vectors hold one value per fold.
#[derive(Debug, Clone, Default)]
pub struct LearningCurve {
    pub train_sizes: Vec<usize>,
    pub train_scores: Vec<Vec<f64>>,
    pub test_scores: Vec<Vec<f64>>,
    /// Seconds spent fitting.
    pub fit_times: Vec<Vec<f64>>,
}

impl LearningCurve {
    pub fn train_summary(&self) -> Vec<(f64, f64)> {
        self.train_scores.iter().map(|s| mean_std(s)).collect()
    }

    pub fn test_summary(&self) -> Vec<(f64, f64)> {
        self.test_scores.iter().map(|s| mean_std(s)).collect()
    }

    pub fn fit_time_summary(&self) -> Vec<(f64, f64)> {
        self.fit_times.iter().map(|s| mean_std(s)).collect()
    }
}

/// Training sizes from 10% to 100% of `n_max` in evenly spaced steps.
fn train_sizes(n_max: usize) -> Vec<usize> {
    let mut sizes: Vec<usize> = (0..LEARNING_CURVE_STEPS)
        .map(|step| {
            let fraction = 0.1 + 0.9 * step as f64 / (LEARNING_CURVE_STEPS - 1) as f64;
            ((fraction * n_max as f64) as usize).max(1)
        })
        .collect();
    sizes.dedup();
    sizes
}

/// Refit `params` on growing prefixes of every training fold.
pub fn learning_curve(
    params: &ModelParams,
    x: ArrayView2<f64>,
    y: ArrayView1<usize>,
    n_classes: usize,
    folds: StratifiedKFold,
) -> Result<LearningCurve> {
    let splits = folds.split(y)?;
    let n_max = splits.iter().map(|(train, _)| train.len()).min().unwrap_or(0);

    let mut curve = LearningCurve {
        train_sizes: train_sizes(n_max),
        ..LearningCurve::default()
    };
    for &size in &curve.train_sizes {
        let mut train_scores = Vec::with_capacity(splits.len());
        let mut test_scores = Vec::with_capacity(splits.len());
        let mut fit_times = Vec::with_capacity(splits.len());
        for (train, test) in &splits {
            let (x_train, y_train) = subset(x, y, &train[..size]);
            let (x_test, y_test) = subset(x, y, test);

            let started = Instant::now();
            let mut estimator = Estimator::from_params(params);
            estimator.fit(x_train.view(), y_train.view(), n_classes)?;
            fit_times.push(started.elapsed().as_secs_f64());

            let on_train = estimator.predict(x_train.view())?;
            let on_test = estimator.predict(x_test.view())?;
            train_scores.push(accuracy(&y_train.to_vec(), &on_train.to_vec()));
            test_scores.push(accuracy(&y_test.to_vec(), &on_test.to_vec()));
        }
        curve.train_scores.push(train_scores);
        curve.test_scores.push(test_scores);
        curve.fit_times.push(fit_times);
    }
    Ok(curve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::algorithm::Algorithm;
    use crate::classify::knn::{KnnParams, KnnWeights};
    use ndarray::array;

    fn clusters() -> (Array2<f64>, Array1<usize>) {
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for i in 0..10 {
            let jitter = i as f64 * 0.01;
            rows.extend([jitter, 0.1 - jitter]);
            targets.push(0);
            rows.extend([1.0 - jitter, 0.9 + jitter]);
            targets.push(1);
        }
        (
            Array2::from_shape_vec((20, 2), rows).unwrap(),
            Array1::from(targets),
        )
    }

    #[test]
    fn folds_partition_rows_and_keep_proportions() {
        let y = array![0, 0, 0, 0, 0, 1, 1, 1, 1, 1];
        let splits = StratifiedKFold::new(5).split(y.view()).unwrap();
        assert_eq!(splits.len(), 5);

        let mut seen = vec![0; y.len()];
        for (train, test) in &splits {
            assert_eq!(train.len() + test.len(), y.len());
            assert_eq!(test.len(), 2);
            let ones = test.iter().filter(|&&row| y[row] == 1).count();
            assert_eq!(ones, 1);
            for &row in test {
                seen[row] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn too_few_samples_for_folds() {
        assert!(StratifiedKFold::new(5).split(array![0, 1].view()).is_err());
        assert!(StratifiedKFold::new(1).split(array![0, 1].view()).is_err());
    }

    #[test]
    fn grid_search_picks_the_best_candidate() {
        let (x, y) = clusters();
        let good = ModelParams::Knn(KnnParams {
            n_neighbors: 3,
            weights: KnnWeights::Uniform,
            p: 2,
        });
        // Sixteen neighbours cover the whole training fold, so every vote ties.
        let poor = ModelParams::Knn(KnnParams {
            n_neighbors: 16,
            weights: KnnWeights::Uniform,
            p: 2,
        });
        let search = GridSearch::new(vec![poor, good.clone()], StratifiedKFold::default());
        let outcome = search.fit(x.view(), y.view(), 2).unwrap();
        assert_eq!(outcome.best_params, good);
        assert_eq!(outcome.best_score, 1.0);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.best_estimator.is_fitted());
    }

    #[test]
    fn learning_curve_shapes() {
        let (x, y) = clusters();
        let params = Algorithm::Gauss.default_params();
        let curve = learning_curve(&params, x.view(), y.view(), 2, StratifiedKFold::default()).unwrap();
        assert_eq!(curve.train_sizes, vec![1, 5, 8, 12, 16]);
        assert_eq!(curve.test_scores.len(), 5);
        assert!(curve.test_scores.iter().all(|fold| fold.len() == 5));
        assert_eq!(curve.test_summary().len(), 5);
    }

    #[test]
    fn population_std() {
        let (mean, std) = mean_std(&[1.0, 3.0]);
        assert_eq!(mean, 2.0);
        assert_eq!(std, 1.0);
    }
}
