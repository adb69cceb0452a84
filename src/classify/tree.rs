//! CART decision trees. The growing routine is shared with the random forest.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

use super::estimator::{Classifier, check_width};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    Gini,
    Entropy,
}

impl Criterion {
    fn impurity(&self, counts: &[f64], total: f64) -> f64 {
        if total <= 0.0 {
            return 0.0;
        }
        match self {
            Criterion::Gini => 1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>(),
            Criterion::Entropy => counts
                .iter()
                .filter(|c| **c > 0.0)
                .map(|c| {
                    let p = c / total;
                    -p * p.log2()
                })
                .sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureRule {
    Sqrt,
    Log2,
    All,
}

/// Number of features examined at every split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxFeatures {
    Count(usize),
    Rule(FeatureRule),
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::Count(count) => *count,
            MaxFeatures::Rule(FeatureRule::Sqrt) => (n_features as f64).sqrt() as usize,
            MaxFeatures::Rule(FeatureRule::Log2) => (n_features as f64).log2() as usize,
            MaxFeatures::Rule(FeatureRule::All) => n_features,
        };
        n.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeParams {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub random_state: u64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            criterion: Criterion::Entropy,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Count(10_000),
            random_state: 6240,
        }
    }
}

// ---------------------------------------------------------------------------
// Tree structure
// ---------------------------------------------------------------------------

/// Growth limits shared by single trees and forests.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeSettings {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Flat node arena; node 0 is the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((idx, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let Node::Split { left, right, .. } = &self.nodes[idx] {
                stack.push((*left, depth + 1));
                stack.push((*right, depth + 1));
            }
        }
        deepest
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
}

fn distribution(y: ArrayView1<usize>, indices: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0.0; n_classes];
    for &i in indices {
        counts[y[i]] += 1.0;
    }
    counts
}

/// Best split over a random order of the features.
///
/// At least `max_features` non-constant features are examined; when none of
/// them yields a positive gain the search goes on through the remaining
/// features until one does or all are exhausted.
fn find_split(
    x: ArrayView2<f64>,
    y: ArrayView1<usize>,
    indices: &[usize],
    parent: &[f64],
    settings: &TreeSettings,
    rng: &mut StdRng,
) -> Option<BestSplit> {
    let n_features = x.ncols();
    let n_try = settings.max_features.resolve(n_features);
    let order_of_features = index::sample(rng, n_features, n_features);

    let mut best: Option<BestSplit> = None;
    let mut examined = 0;
    let mut order: Vec<(f64, usize)> = Vec::with_capacity(indices.len());
    for feature in order_of_features.iter() {
        if examined >= n_try && best.is_some() {
            break;
        }
        order.clear();
        order.extend(indices.iter().map(|&i| (x[[i, feature]], y[i])));
        order.sort_by(|a, b| a.0.total_cmp(&b.0));
        if order[0].0 == order[order.len() - 1].0 {
            continue;
        }
        examined += 1;

        if let Some(split) = scan_feature(feature, &order, parent, settings) {
            if best.as_ref().map_or(true, |b| split.score > b.score) {
                best = Some(split);
            }
        }
    }
    best
}

/// Best threshold of one feature, given its values sorted with their classes.
fn scan_feature(
    feature: usize,
    order: &[(f64, usize)],
    parent: &[f64],
    settings: &TreeSettings,
) -> Option<BestSplit> {
    let total = order.len() as f64;
    let parent_impurity = settings.criterion.impurity(parent, total);
    let min_leaf = settings.min_samples_leaf.max(1);

    let mut best: Option<BestSplit> = None;
    let mut left = vec![0.0; parent.len()];
    let mut right = parent.to_vec();
    for pos in 0..order.len() - 1 {
        let (value, class) = order[pos];
        left[class] += 1.0;
        right[class] -= 1.0;
        let next = order[pos + 1].0;
        let n_left = pos + 1;
        let n_right = order.len() - n_left;
        if value == next || n_left < min_leaf || n_right < min_leaf {
            continue;
        }

        let weighted = (n_left as f64 * settings.criterion.impurity(&left, n_left as f64)
            + n_right as f64 * settings.criterion.impurity(&right, n_right as f64))
            / total;
        let gain = parent_impurity - weighted;
        if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.score) {
            best = Some(BestSplit {
                feature,
                threshold: (value + next) / 2.0,
                score: gain,
            });
        }
    }
    best
}

/// Grow a tree on the rows named by `indices` (repeats allowed, as in a
/// bootstrap sample). Nodes are expanded from an explicit work stack.
pub(crate) fn grow_tree(
    x: ArrayView2<f64>,
    y: ArrayView1<usize>,
    indices: Vec<usize>,
    n_classes: usize,
    settings: &TreeSettings,
    rng: &mut StdRng,
) -> Tree {
    let mut nodes = vec![Node::Leaf {
        distribution: Vec::new(),
    }];
    let mut stack = vec![(0usize, indices, 0usize)];

    while let Some((slot, rows, depth)) = stack.pop() {
        let counts = distribution(y, &rows, n_classes);
        let pure = counts.iter().filter(|c| **c > 0.0).count() <= 1;
        let depth_reached = settings.max_depth.is_some_and(|max| depth >= max);
        let too_small = rows.len() < settings.min_samples_split.max(2);

        let split = if pure || depth_reached || too_small {
            None
        } else {
            find_split(x, y, &rows, &counts, settings, rng)
        };

        match split {
            Some(split) => {
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                    .iter()
                    .partition(|&&i| x[[i, split.feature]] <= split.threshold);
                let left = nodes.len();
                let right = left + 1;
                nodes.push(Node::Leaf {
                    distribution: Vec::new(),
                });
                nodes.push(Node::Leaf {
                    distribution: Vec::new(),
                });
                nodes[slot] = Node::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left,
                    right,
                };
                stack.push((right, right_rows, depth + 1));
                stack.push((left, left_rows, depth + 1));
            }
            None => {
                let total: f64 = counts.iter().sum();
                let distribution = counts.iter().map(|c| c / total).collect();
                nodes[slot] = Node::Leaf { distribution };
            }
        }
    }

    Tree { nodes }
}

// ---------------------------------------------------------------------------
// Decision tree classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeState {
    tree: Tree,
    n_features: usize,
    n_classes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeClassifier {
    params: TreeParams,
    state: Option<TreeState>,
}

impl DecisionTreeClassifier {
    pub fn new(params: TreeParams) -> Self {
        Self { params, state: None }
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    #[cfg(test)]
    pub fn depth(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.tree.depth())
    }
}

impl Classifier for DecisionTreeClassifier {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<usize>, n_classes: usize) -> Result<()> {
        let settings = TreeSettings {
            criterion: self.params.criterion,
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: self.params.max_features,
        };
        let mut rng = StdRng::seed_from_u64(self.params.random_state);
        let tree = grow_tree(x, y, (0..x.nrows()).collect(), n_classes, &settings, &mut rng);
        self.state = Some(TreeState {
            tree,
            n_features: x.ncols(),
            n_classes,
        });
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or(ClassifierError::NotFitted("decision tree"))?;
        check_width(state.n_features, x)?;

        let mut proba = Array2::zeros((x.nrows(), state.n_classes));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let leaf = Array1::from(state.tree.predict_row(row).to_vec());
            proba.row_mut(i).assign(&leaf);
        }
        Ok(proba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn and_gate() -> (Array2<f64>, Array1<usize>) {
        (
            array![
                [0.0, 0.0],
                [0.0, 1.0],
                [1.0, 0.0],
                [1.0, 1.0],
                [0.1, 0.1],
                [0.1, 0.9],
                [0.9, 0.1],
                [0.9, 0.9]
            ],
            array![0, 0, 0, 1, 0, 0, 0, 1],
        )
    }

    #[test]
    fn unlimited_tree_fits_training_data() {
        let (x, y) = and_gate();
        let mut tree = DecisionTreeClassifier::new(TreeParams {
            criterion: Criterion::Gini,
            max_features: MaxFeatures::Rule(FeatureRule::All),
            ..TreeParams::default()
        });
        tree.fit(x.view(), y.view(), 2).unwrap();
        assert_eq!(tree.predict(x.view()).unwrap(), y);
    }

    #[test]
    fn max_depth_limits_growth() {
        let (x, y) = and_gate();
        let mut tree = DecisionTreeClassifier::new(TreeParams {
            max_depth: Some(1),
            max_features: MaxFeatures::Rule(FeatureRule::All),
            ..TreeParams::default()
        });
        tree.fit(x.view(), y.view(), 2).unwrap();
        assert!(tree.depth().unwrap() <= 1);
        let proba = tree.predict_proba(x.view()).unwrap();
        for row in proba.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn sparse_features_still_split() {
        // 100 columns, only the first one carries signal, the rest are zero
        let n_rows = 40;
        let mut x = Array2::<f64>::zeros((n_rows, 100));
        let mut y = Array1::<usize>::zeros(n_rows);
        for row in 0..n_rows {
            if row % 2 == 1 {
                x[[row, 0]] = 0.3;
                y[row] = 1;
            }
        }
        for seed in 0..20 {
            let mut tree = DecisionTreeClassifier::new(TreeParams {
                max_features: MaxFeatures::Rule(FeatureRule::Sqrt),
                random_state: seed,
                ..TreeParams::default()
            });
            tree.fit(x.view(), y.view(), 2).unwrap();
            assert!(tree.depth().unwrap() >= 1, "seed {seed} grew a single leaf");
            assert_eq!(tree.predict(x.view()).unwrap(), y);
        }
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::Rule(FeatureRule::Sqrt).resolve(2000), 44);
        assert_eq!(MaxFeatures::Rule(FeatureRule::Log2).resolve(1024), 10);
        assert_eq!(MaxFeatures::Count(10_000).resolve(2000), 2000);
        assert_eq!(MaxFeatures::Count(0).resolve(5), 1);
    }

    #[test]
    fn max_features_serialises_untagged() {
        assert_eq!(
            serde_json::to_string(&MaxFeatures::Rule(FeatureRule::Sqrt)).unwrap(),
            r#""sqrt""#
        );
        let count: MaxFeatures = serde_json::from_str("10000").unwrap();
        assert_eq!(count, MaxFeatures::Count(10_000));
    }
}
