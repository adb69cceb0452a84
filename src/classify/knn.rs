use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

use super::estimator::{Classifier, check_width};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnnWeights {
    Uniform,
    Distance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnnParams {
    pub n_neighbors: usize,
    pub weights: KnnWeights,
    /// Minkowski power: 1 = manhattan, 2 = euclidean.
    pub p: u32,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self {
            n_neighbors: 15,
            weights: KnnWeights::Uniform,
            p: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnnState {
    x: Array2<f64>,
    y: Array1<usize>,
    n_classes: usize,
}

/// Brute-force k-nearest-neighbours vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnClassifier {
    params: KnnParams,
    state: Option<KnnState>,
}

impl KnnClassifier {
    pub fn new(params: KnnParams) -> Self {
        Self { params, state: None }
    }

    pub fn params(&self) -> &KnnParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.params.p {
            1 => a.iter().zip(b).map(|(u, v)| (u - v).abs()).sum(),
            2 => a
                .iter()
                .zip(b)
                .map(|(u, v)| (u - v) * (u - v))
                .sum::<f64>()
                .sqrt(),
            p => {
                let p = f64::from(p);
                a.iter()
                    .zip(b)
                    .map(|(u, v)| (u - v).abs().powf(p))
                    .sum::<f64>()
                    .powf(1.0 / p)
            }
        }
    }
}

impl Classifier for KnnClassifier {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()> {
        if self.params.n_neighbors == 0 || self.params.p == 0 {
            return Err(ClassifierError::InvalidInput(
                "n_neighbors and p must be positive".into(),
            ));
        }
        self.state = Some(KnnState {
            x: x.to_owned(),
            y: y.to_owned(),
            n_classes,
        });
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or(ClassifierError::NotFitted("k-nearest-neighbours model"))?;
        check_width(state.x.ncols(), x)?;

        let k = self.params.n_neighbors.min(state.x.nrows());
        let mut proba = Array2::zeros((x.nrows(), state.n_classes));

        for (row_idx, query) in x.axis_iter(Axis(0)).enumerate() {
            let mut neighbours: Vec<(f64, usize)> = state
                .x
                .axis_iter(Axis(0))
                .map(|train| self.distance(query, train))
                .zip(state.y.iter().copied())
                .collect();
            neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));
            neighbours.truncate(k);

            let exact = neighbours.iter().any(|(d, _)| *d == 0.0);
            for (dist, class) in neighbours {
                let weight = match self.params.weights {
                    KnnWeights::Uniform => 1.0,
                    // Exact matches take the whole vote.
                    KnnWeights::Distance if exact => {
                        if dist == 0.0 {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    KnnWeights::Distance => 1.0 / dist,
                };
                proba[[row_idx, class]] += weight;
            }

            let mut row = proba.row_mut(row_idx);
            let total = row.sum();
            if total > 0.0 {
                row.mapv_inplace(|w| w / total);
            }
        }

        Ok(proba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn training() -> (Array2<f64>, Array1<usize>) {
        (
            array![[0.0, 0.0], [0.1, 0.0], [0.0, 0.2], [1.0, 1.0], [0.9, 1.1], [1.2, 0.9]],
            array![0, 0, 0, 1, 1, 1],
        )
    }

    #[test]
    fn uniform_vote_over_k_neighbours() {
        let (x, y) = training();
        let mut knn = KnnClassifier::new(KnnParams {
            n_neighbors: 3,
            weights: KnnWeights::Uniform,
            p: 2,
        });
        knn.fit(x.view(), y.view(), 2).unwrap();

        let proba = knn.predict_proba(array![[0.05, 0.05], [1.0, 0.95]].view()).unwrap();
        assert_eq!(proba.row(0).to_vec(), vec![1.0, 0.0]);
        assert_eq!(knn.predict(array![[1.0, 0.95]].view()).unwrap().to_vec(), vec![1]);
    }

    #[test]
    fn distance_weights_favour_exact_matches() {
        let (x, y) = training();
        let mut knn = KnnClassifier::new(KnnParams {
            n_neighbors: 6,
            weights: KnnWeights::Distance,
            p: 1,
        });
        knn.fit(x.view(), y.view(), 2).unwrap();
        let proba = knn.predict_proba(array![[1.0, 1.0]].view()).unwrap();
        assert_eq!(proba.row(0).to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn k_larger_than_training_set_is_clamped() {
        let (x, y) = training();
        let mut knn = KnnClassifier::new(KnnParams::default());
        knn.fit(x.view(), y.view(), 3).unwrap();
        let proba = knn.predict_proba(array![[0.5, 0.5]].view()).unwrap();
        assert_eq!(proba.ncols(), 3);
        assert!((proba.row(0).sum() - 1.0).abs() < 1e-12);
        assert_eq!(proba[[0, 2]], 0.0);
    }
}
