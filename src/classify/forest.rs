use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

use super::estimator::{Classifier, check_width};
use super::tree::{Criterion, FeatureRule, MaxFeatures, Tree, TreeSettings, grow_tree};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    /// Draw every tree's rows with replacement.
    pub bootstrap: bool,
    pub random_state: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 150,
            criterion: Criterion::Entropy,
            max_depth: None,
            min_samples_split: 15,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Rule(FeatureRule::Sqrt),
            bootstrap: true,
            random_state: 6240,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForestState {
    trees: Vec<Tree>,
    n_features: usize,
    n_classes: usize,
}

/// Bagged decision trees; probabilities are the mean of the trees' leaf
/// distributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    params: ForestParams,
    state: Option<ForestState>,
}

impl RandomForestClassifier {
    pub fn new(params: ForestParams) -> Self {
        Self { params, state: None }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    #[cfg(test)]
    pub fn n_trees(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.trees.len())
    }
}

impl Classifier for RandomForestClassifier {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()> {
        if self.params.n_estimators == 0 {
            return Err(ClassifierError::InvalidInput(
                "a forest needs at least one tree".into(),
            ));
        }
        let settings = TreeSettings {
            criterion: self.params.criterion,
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: self.params.max_features,
        };
        let mut rng = StdRng::seed_from_u64(self.params.random_state);
        let n_rows = x.nrows();

        let trees = (0..self.params.n_estimators)
            .map(|_| {
                let rows = if self.params.bootstrap {
                    (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect()
                } else {
                    (0..n_rows).collect()
                };
                grow_tree(x, y, rows, n_classes, &settings, &mut rng)
            })
            .collect();

        self.state = Some(ForestState {
            trees,
            n_features: x.ncols(),
            n_classes,
        });
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or(ClassifierError::NotFitted("random forest"))?;
        check_width(state.n_features, x)?;

        let mut proba = Array2::zeros((x.nrows(), state.n_classes));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let mut target = proba.row_mut(i);
            for tree in &state.trees {
                for (acc, p) in target.iter_mut().zip(tree.predict_row(row)) {
                    *acc += p;
                }
            }
            target.mapv_inplace(|p| p / state.trees.len() as f64);
        }
        Ok(proba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn clusters() -> (Array2<f64>, ndarray::Array1<usize>) {
        (
            array![
                [0.0, 0.1, 0.0],
                [0.1, 0.0, 0.1],
                [0.2, 0.1, 0.0],
                [0.1, 0.2, 0.1],
                [1.0, 0.9, 1.0],
                [0.9, 1.0, 0.8],
                [1.1, 0.8, 0.9],
                [0.8, 1.1, 1.0]
            ],
            array![0, 0, 0, 0, 1, 1, 1, 1],
        )
    }

    fn small_forest() -> ForestParams {
        ForestParams {
            n_estimators: 25,
            min_samples_split: 2,
            ..ForestParams::default()
        }
    }

    #[test]
    fn forest_separates_clusters() {
        let (x, y) = clusters();
        let mut forest = RandomForestClassifier::new(small_forest());
        forest.fit(x.view(), y.view(), 2).unwrap();
        assert_eq!(forest.n_trees(), 25);
        let pred = forest.predict(array![[0.05, 0.05, 0.05], [0.95, 0.95, 0.95]].view()).unwrap();
        assert_eq!(pred.to_vec(), vec![0, 1]);
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = clusters();
        let query = array![[0.5, 0.4, 0.6]];
        let mut a = RandomForestClassifier::new(small_forest());
        let mut b = RandomForestClassifier::new(small_forest());
        a.fit(x.view(), y.view(), 2).unwrap();
        b.fit(x.view(), y.view(), 2).unwrap();
        assert_eq!(
            a.predict_proba(query.view()).unwrap(),
            b.predict_proba(query.view()).unwrap()
        );
    }
}
