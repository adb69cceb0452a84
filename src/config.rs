use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};

use crate::classify::algorithm::Algorithm;
use crate::classify::search::DEFAULT_FOLDS;
use crate::data::filter::LabelFilter;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Fit (or continue fitting) models and save them.
    Train,
    /// Score saved models, ensembled, against labelled reports.
    Test,
}

/// Held-out file used by test mode when no texts are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Split {
    Dev,
    Test,
}

impl Split {
    pub fn default_path(&self) -> PathBuf {
        let name = match self {
            Split::Dev => "dev",
            Split::Test => "test",
        };
        PathBuf::from(format!("../ASRS/ASRS_{name}.csv"))
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "asrs-classifier",
    about = "Train, persist and evaluate classifiers over ASRS safety reports"
)]
pub struct Cli {
    #[arg(value_enum)]
    pub mode: Mode,

    /// Saved model directory; repeat to continue several models or to
    /// ensemble them when testing.
    #[arg(long = "model")]
    pub models: Vec<PathBuf>,

    /// ASRS CSV export to read reports from; repeatable.
    #[arg(long = "texts")]
    pub texts: Vec<PathBuf>,

    /// Free text to label with each model in test mode; repeatable.
    /// Given without `--texts`, no held-out file is scored.
    #[arg(long = "text")]
    pub free_texts: Vec<String>,

    /// Column holding the class, e.g. "Events_Anomaly".
    #[arg(long)]
    pub label: Option<String>,

    /// Label value to keep; repeat for several. Omit to keep every value.
    #[arg(long = "filter")]
    pub filters: Vec<String>,

    /// One of knn, svm, tree, forest, mlp, gauss, mnb, bernoulli.
    #[arg(long)]
    pub algorithm: Option<String>,

    /// Undersample every class to about the minority-class size.
    #[arg(long)]
    pub normalize: bool,

    /// Write ROC (test) or learning-curve (train) images.
    #[arg(long)]
    pub plot: bool,

    /// Compute a learning curve after training.
    #[arg(long)]
    pub learning_curve: bool,

    #[arg(long, value_enum, default_value = "test")]
    pub split: Split,

    /// Parent directory of saved models, and of test-mode plots.
    #[arg(long, default_value = "classifiers")]
    pub output_dir: PathBuf,

    /// Cross-validation folds of the hyperparameter search.
    #[arg(long, default_value_t = DEFAULT_FOLDS)]
    pub folds: usize,

    #[arg(long, default_value_t = 6240)]
    pub seed: u64,

    /// Vocabulary size of the TF-IDF vectorizer of new models.
    #[arg(long, default_value_t = 2000)]
    pub max_features: usize,
}

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

/// Everything a run needs, checked once up front.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    pub models: Vec<PathBuf>,
    pub texts: Vec<PathBuf>,
    pub free_texts: Vec<String>,
    pub label: Option<String>,
    /// `None` when no `--filter` was given, so saved filters can apply.
    pub filter: Option<LabelFilter>,
    pub algorithm: Algorithm,
    pub normalize: bool,
    pub plot: bool,
    pub learning_curve: bool,
    pub split: Split,
    pub output_dir: PathBuf,
    pub folds: usize,
    pub seed: u64,
    pub max_features: usize,
}

impl RunConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let algorithm = match cli.algorithm.as_deref() {
            Some(name) => name.parse::<Algorithm>()?,
            None => {
                if cli.mode == Mode::Train && cli.models.is_empty() {
                    log::info!("No algorithm given, using {}", Algorithm::Knn);
                }
                Algorithm::Knn
            }
        };

        if cli.mode == Mode::Test && cli.models.is_empty() {
            bail!("testing needs at least one --model directory");
        }
        if cli.mode == Mode::Train && cli.texts.is_empty() {
            bail!("training needs at least one --texts file");
        }
        if cli.mode == Mode::Train && cli.models.is_empty() && cli.label.is_none() {
            bail!("training a new model needs a --label column");
        }
        if cli.folds < 2 {
            bail!("--folds must be at least 2, got {}", cli.folds);
        }
        if cli.max_features == 0 {
            bail!("--max-features must be positive");
        }

        let filter = if cli.filters.is_empty() {
            None
        } else {
            Some(LabelFilter::new(cli.filters))
        };

        Ok(Self {
            mode: cli.mode,
            models: cli.models,
            texts: cli.texts,
            free_texts: cli.free_texts,
            label: cli.label,
            filter,
            algorithm,
            normalize: cli.normalize,
            plot: cli.plot,
            learning_curve: cli.learning_curve,
            split: cli.split,
            output_dir: cli.output_dir,
            folds: cli.folds,
            seed: cli.seed,
            max_features: cli.max_features,
        })
    }

    /// Whether test mode scores labelled reports, not only free texts.
    pub fn evaluates(&self) -> bool {
        self.free_texts.is_empty() || !self.texts.is_empty()
    }

    /// Texts to score in test mode.
    pub fn test_texts(&self) -> Vec<PathBuf> {
        if self.texts.is_empty() {
            vec![self.split.default_path()]
        } else {
            self.texts.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<RunConfig> {
        let cli = Cli::try_parse_from(std::iter::once("asrs-classifier").chain(args.iter().copied()))?;
        RunConfig::from_cli(cli)
    }

    #[test]
    fn train_defaults() {
        let config = parse(&["train", "--texts", "a.csv", "--label", "Events_Anomaly"]).unwrap();
        assert_eq!(config.mode, Mode::Train);
        assert_eq!(config.algorithm, Algorithm::Knn);
        assert_eq!(config.folds, 5);
        assert_eq!(config.seed, 6240);
        assert_eq!(config.output_dir, PathBuf::from("classifiers"));
        assert!(config.filter.is_none());
    }

    #[test]
    fn repeated_options_accumulate() {
        let config = parse(&[
            "test", "--model", "m1", "--model", "m2", "--filter", "Conflict", "--filter",
            "Deviation", "--split", "dev",
        ])
        .unwrap();
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.filter.as_ref().unwrap().values().count(), 2);
        assert_eq!(config.test_texts(), vec![PathBuf::from("../ASRS/ASRS_dev.csv")]);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = parse(&["train", "--texts", "a.csv", "--label", "x", "--algorithm", "boost"])
            .unwrap_err();
        assert!(err.to_string().contains("boost"));
    }

    #[test]
    fn test_mode_needs_a_model() {
        assert!(parse(&["test"]).is_err());
        let config = parse(&["test", "--model", "m"]).unwrap();
        assert_eq!(config.test_texts(), vec![PathBuf::from("../ASRS/ASRS_test.csv")]);
        assert!(config.evaluates());
    }

    #[test]
    fn free_texts_alone_skip_evaluation() {
        let config = parse(&["test", "--model", "m", "--text", "tcas alert", "--text", "level bust"])
            .unwrap();
        assert_eq!(config.free_texts.len(), 2);
        assert!(!config.evaluates());

        let config = parse(&["test", "--model", "m", "--text", "tcas", "--texts", "a.csv"]).unwrap();
        assert!(config.evaluates());
    }
}
