//! Closed registry of classification algorithms, their default
//! configurations and their hyperparameter search grids.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClassifierError, Result};

use super::forest::ForestParams;
use super::knn::{KnnParams, KnnWeights};
use super::mlp::MlpParams;
use super::naive_bayes::{BernoulliNbParams, GaussianNbParams, MultinomialNbParams};
use super::svm::{Kernel, SvmParams};
use super::tree::{Criterion, FeatureRule, MaxFeatures, TreeParams};

// ---------------------------------------------------------------------------
// Algorithm identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Knn,
    Svm,
    Tree,
    Forest,
    Mlp,
    Gauss,
    Mnb,
    Bernoulli,
}

impl Algorithm {
    pub const ALL: [Algorithm; 8] = [
        Algorithm::Knn,
        Algorithm::Svm,
        Algorithm::Tree,
        Algorithm::Forest,
        Algorithm::Mlp,
        Algorithm::Gauss,
        Algorithm::Mnb,
        Algorithm::Bernoulli,
    ];

    /// Name used on the command line, in `parameters.json` and in bundle
    /// directory names.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Knn => "knn",
            Algorithm::Svm => "svm",
            Algorithm::Tree => "tree",
            Algorithm::Forest => "forest",
            Algorithm::Mlp => "mlp",
            Algorithm::Gauss => "gauss",
            Algorithm::Mnb => "mnb",
            Algorithm::Bernoulli => "bernoulli",
        }
    }

    /// Hard-coded starting configuration.
    pub fn default_params(&self) -> ModelParams {
        match self {
            Algorithm::Knn => ModelParams::Knn(KnnParams::default()),
            Algorithm::Svm => ModelParams::Svm(SvmParams::default()),
            Algorithm::Tree => ModelParams::Tree(TreeParams::default()),
            Algorithm::Forest => ModelParams::Forest(ForestParams::default()),
            Algorithm::Mlp => ModelParams::Mlp(MlpParams::default()),
            Algorithm::Gauss => ModelParams::GaussianNb(GaussianNbParams::default()),
            Algorithm::Mnb => ModelParams::MultinomialNb(MultinomialNbParams::default()),
            Algorithm::Bernoulli => ModelParams::BernoulliNb(BernoulliNbParams::default()),
        }
    }

    /// Candidates of the cross-validated search: the hard-coded grid axes
    /// applied on top of `base`. Algorithms without a grid yield `base`
    /// alone.
    pub fn search_grid(&self, base: &ModelParams) -> Result<Vec<ModelParams>> {
        if base.algorithm() != *self {
            return Err(ClassifierError::CorruptedParameters(format!(
                "{} parameters given to the {} search",
                base.algorithm(),
                self
            )));
        }

        let grid = match base {
            ModelParams::Knn(base) => knn_grid(base),
            ModelParams::Svm(base) => svm_grid(base),
            ModelParams::Tree(base) => tree_grid(base),
            ModelParams::Forest(base) => forest_grid(base),
            ModelParams::Mlp(base) => mlp_grid(base),
            other => vec![other.clone()],
        };
        Ok(grid)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Algorithm::ALL
            .into_iter()
            .find(|algorithm| algorithm.name() == wanted)
            .ok_or_else(|| ClassifierError::UnknownAlgorithm {
                name: s.to_string(),
                available: Algorithm::ALL
                    .iter()
                    .map(Algorithm::name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

// ---------------------------------------------------------------------------
// Typed hyperparameters
// ---------------------------------------------------------------------------

/// Hyperparameters of one estimator. Serialized as the bare parameter object
/// (`model_params` in `parameters.json`); the algorithm is stored beside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModelParams {
    Knn(KnnParams),
    Svm(SvmParams),
    Tree(TreeParams),
    Forest(ForestParams),
    Mlp(MlpParams),
    GaussianNb(GaussianNbParams),
    MultinomialNb(MultinomialNbParams),
    BernoulliNb(BernoulliNbParams),
}

impl ModelParams {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            ModelParams::Knn(_) => Algorithm::Knn,
            ModelParams::Svm(_) => Algorithm::Svm,
            ModelParams::Tree(_) => Algorithm::Tree,
            ModelParams::Forest(_) => Algorithm::Forest,
            ModelParams::Mlp(_) => Algorithm::Mlp,
            ModelParams::GaussianNb(_) => Algorithm::Gauss,
            ModelParams::MultinomialNb(_) => Algorithm::Mnb,
            ModelParams::BernoulliNb(_) => Algorithm::Bernoulli,
        }
    }

    /// Parse a stored parameter object against the schema of `algorithm`.
    /// Missing or unknown keys mean the parameters file is corrupted.
    pub fn from_value(algorithm: Algorithm, value: Value) -> Result<Self> {
        let params = match algorithm {
            Algorithm::Knn => ModelParams::Knn(parse(algorithm, value)?),
            Algorithm::Svm => ModelParams::Svm(parse(algorithm, value)?),
            Algorithm::Tree => ModelParams::Tree(parse(algorithm, value)?),
            Algorithm::Forest => ModelParams::Forest(parse(algorithm, value)?),
            Algorithm::Mlp => ModelParams::Mlp(parse(algorithm, value)?),
            Algorithm::Gauss => ModelParams::GaussianNb(parse(algorithm, value)?),
            Algorithm::Mnb => ModelParams::MultinomialNb(parse(algorithm, value)?),
            Algorithm::Bernoulli => ModelParams::BernoulliNb(parse(algorithm, value)?),
        };
        Ok(params)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Abbreviated `key_value` pairs, sorted by key and joined by commas.
    /// Keys shrink to the first letter of each `_`-separated word
    /// (`min_samples_leaf` → `msl`).
    pub fn signature(&self) -> String {
        let Value::Object(map) = self.to_value() else {
            return String::new();
        };
        let sorted: BTreeMap<String, Value> = map.into_iter().collect();
        sorted
            .iter()
            .map(|(key, value)| format!("{}_{}", abbreviate(key), format_value(value)))
            .collect::<Vec<_>>()
            .join(",")
            .replace(' ', "_")
    }
}

fn parse<T: DeserializeOwned>(algorithm: Algorithm, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|err| {
        ClassifierError::CorruptedParameters(format!("{algorithm} model_params: {err}"))
    })
}

fn abbreviate(key: &str) -> String {
    key.split('_').filter_map(|word| word.chars().next()).collect()
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => format!(
            "({})",
            items.iter().map(format_value).collect::<Vec<_>>().join(", ")
        ),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Search grids
// ---------------------------------------------------------------------------

fn knn_grid(base: &KnnParams) -> Vec<ModelParams> {
    let mut grid = Vec::new();
    for n_neighbors in [10, 15, 20] {
        for weights in [KnnWeights::Uniform, KnnWeights::Distance] {
            for p in [1, 2] {
                grid.push(ModelParams::Knn(KnnParams {
                    n_neighbors,
                    weights,
                    p,
                    ..base.clone()
                }));
            }
        }
    }
    grid
}

fn svm_grid(base: &SvmParams) -> Vec<ModelParams> {
    let mut grid = Vec::new();
    for c in [1.0, 0.5, 1.5] {
        for kernel in [Kernel::Poly, Kernel::Rbf] {
            grid.push(ModelParams::Svm(SvmParams {
                c,
                kernel,
                ..base.clone()
            }));
        }
    }
    grid
}

const MAX_FEATURES_AXIS: [MaxFeatures; 2] = [
    MaxFeatures::Rule(FeatureRule::Sqrt),
    MaxFeatures::Count(10_000),
];

fn tree_grid(base: &TreeParams) -> Vec<ModelParams> {
    let mut grid = Vec::new();
    for criterion in [Criterion::Gini, Criterion::Entropy] {
        for max_depth in [None, Some(8), Some(16)] {
            for min_samples_split in [4, 8, 16, 32] {
                for min_samples_leaf in [2, 4, 8, 16] {
                    for max_features in MAX_FEATURES_AXIS {
                        grid.push(ModelParams::Tree(TreeParams {
                            criterion,
                            max_depth,
                            min_samples_split,
                            min_samples_leaf,
                            max_features,
                            ..base.clone()
                        }));
                    }
                }
            }
        }
    }
    grid
}

fn forest_grid(base: &ForestParams) -> Vec<ModelParams> {
    let mut grid = Vec::new();
    for criterion in [Criterion::Gini, Criterion::Entropy] {
        for max_depth in [None, Some(8), Some(16)] {
            for min_samples_split in [4, 8, 16, 32] {
                for min_samples_leaf in [2, 8, 16] {
                    for max_features in MAX_FEATURES_AXIS {
                        grid.push(ModelParams::Forest(ForestParams {
                            criterion,
                            max_depth,
                            min_samples_split,
                            min_samples_leaf,
                            max_features,
                            ..base.clone()
                        }));
                    }
                }
            }
        }
    }
    grid
}

fn mlp_grid(base: &MlpParams) -> Vec<ModelParams> {
    let mut grid = Vec::new();
    for hidden_layer_sizes in [vec![256, 32], vec![128, 16]] {
        for alpha in [0.005, 0.01, 0.0005] {
            for learning_rate_init in [0.005, 0.001] {
                grid.push(ModelParams::Mlp(MlpParams {
                    hidden_layer_sizes: hidden_layer_sizes.clone(),
                    alpha,
                    learning_rate_init,
                    ..base.clone()
                }));
            }
        }
    }
    grid
}
