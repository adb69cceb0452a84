/// Classification core: estimators, hyperparameter search, persistence and
/// evaluation.
///
/// Architecture:
/// ```text
///   features::preprocess ──► (X, y)
///                               │
///                               ▼
///   ┌─────────┐  grid   ┌──────────┐  best   ┌────────┐
///   │ trainer  │ ──────► │  search   │ ──────► │ bundle │ ──► classifiers/<name>/
///   └─────────┘         └──────────┘         └────────┘
///                               │                  │
///                        estimator (knn, svm,      ▼
///                        tree, forest, mlp,  ┌───────────┐      ┌───────────┐
///                        naive bayes)        │ predictor  │ ───► │ evaluator │
///                                            └───────────┘      └───────────┘
/// ```

pub mod algorithm;
pub mod bundle;
pub mod encoding;
pub mod estimator;
pub mod evaluator;
pub mod forest;
pub mod knn;
pub mod metrics;
pub mod mlp;
pub mod naive_bayes;
pub mod predictor;
pub mod search;
pub mod svm;
pub mod trainer;
pub mod tree;
