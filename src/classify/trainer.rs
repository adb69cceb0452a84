use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Local;

use crate::data::filter::LabelFilter;
use crate::features::preprocess::{ReportPreprocessor, data_distribution};
use crate::features::tfidf::{TfidfVectorizer, VectorizerParams};
use crate::plot;

use super::algorithm::{Algorithm, ModelParams};
use super::bundle::{BundleMetadata, ModelBundle, TrainedLabel, TrainingRecord};
use super::encoding::Encoding;
use super::estimator::Classifier;
use super::evaluator::{EvaluationReport, evaluate};
use super::search::{DEFAULT_FOLDS, GridSearch, LearningCurve, StratifiedKFold, learning_curve};

/// File the learning-curve image is written to, inside the bundle directory.
pub const LEARNING_CURVE_FILE: &str = "learning_curve.png";

#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Undersample every class to the scaled minority-class count.
    pub normalize: bool,
    pub deviation_rate: f64,
    pub seed: u64,
    pub cv_folds: usize,
    /// Parent of the generated bundle directories.
    pub output_root: PathBuf,
    /// Vectorizer settings for a fresh model; resumed models keep theirs.
    pub vectorizer_params: VectorizerParams,
    pub learning_curve: bool,
    /// Render the learning curve next to the bundle.
    pub plot: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            normalize: false,
            deviation_rate: 1.0,
            seed: 6240,
            cv_folds: DEFAULT_FOLDS,
            output_root: PathBuf::from("classifiers"),
            vectorizer_params: VectorizerParams::default(),
            learning_curve: false,
            plot: false,
        }
    }
}

/// Result of one training run.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub bundle: ModelBundle,
    /// Directory the bundle was saved to.
    pub directory: PathBuf,
    /// Mean cross-validated accuracy of the chosen candidate.
    pub best_score: f64,
    /// Scores of the fitted model on its own training rows.
    pub report: EvaluationReport,
    pub learning_curve: Option<LearningCurve>,
}

/// Picks hyperparameters by grid search and persists the refitted model.
///
/// A trainer either starts from an algorithm's defaults or continues an
/// existing bundle, in which case its encoding, vectorizer settings, trained
/// label and text history carry over.
#[derive(Debug, Clone)]
pub struct Trainer {
    algorithm: Algorithm,
    base_params: ModelParams,
    encoding: Encoding,
    vectorizer_params: VectorizerParams,
    trained_label: Option<TrainedLabel>,
    trained_texts: TrainingRecord,
    options: TrainOptions,
}

impl Trainer {
    pub fn new(algorithm: Algorithm, options: TrainOptions) -> Self {
        log::info!("Training a new {algorithm} model");
        Self {
            algorithm,
            base_params: algorithm.default_params(),
            encoding: Encoding::default(),
            vectorizer_params: options.vectorizer_params.clone(),
            trained_label: None,
            trained_texts: TrainingRecord::default(),
            options,
        }
    }

    pub fn resume(bundle: ModelBundle, options: TrainOptions) -> Self {
        let BundleMetadata {
            algorithm,
            encoding,
            model_params,
            trained_label,
            trained_texts,
            vectorizer_params,
            ..
        } = bundle.metadata;
        log::info!(
            "Continuing a {algorithm} model trained on {} file(s)",
            trained_texts.paths().len()
        );
        Self {
            algorithm,
            base_params: model_params,
            encoding,
            vectorizer_params,
            trained_label: Some(trained_label),
            trained_texts,
            options,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Train on the reports in `paths`, classifying them by the `label`
    /// column. Only values accepted by `filter` are kept.
    ///
    /// Resumed trainers fall back to the label and filter they were trained
    /// with when `label` or `filter` is omitted.
    pub fn train_report_classification(
        &self,
        paths: &[PathBuf],
        label: Option<&str>,
        filter: Option<LabelFilter>,
    ) -> Result<TrainOutcome> {
        let trained_texts = self.trained_texts.extended(paths);
        let label = match (label, &self.trained_label) {
            (Some(label), _) => label.to_string(),
            (None, Some(trained)) => trained.label.clone(),
            (None, None) => bail!("a label column is required to train a new model"),
        };
        let filter = filter
            .or_else(|| self.trained_label.as_ref().map(|t| t.filter.clone()))
            .unwrap_or_default();

        let mut preprocessor = ReportPreprocessor::new(
            TfidfVectorizer::new(self.vectorizer_params.clone()),
            self.encoding.clone(),
        )
        .with_normalization(self.options.deviation_rate, self.options.seed);
        let (x, y) = preprocessor
            .vectorize_texts(paths, &label, true, &filter, self.options.normalize)
            .with_context(|| format!("vectorizing \"{label}\" training reports"))?;
        let (vectorizer, encoding) = preprocessor.into_parts();
        let n_classes = encoding.len();
        for (id, name) in encoding.iter() {
            log::debug!("class {id}: {name}");
        }

        let (_, fractions) = data_distribution(&y.to_vec(), n_classes);
        log::info!("Train data distribution {fractions:.3?}");
        log::info!("Train data shape: {:?}", x.dim());

        let candidates = self.algorithm.search_grid(&self.base_params)?;
        let search = GridSearch::new(candidates, StratifiedKFold::new(self.options.cv_folds));
        let outcome = search
            .fit(x.view(), y.view(), n_classes)
            .with_context(|| format!("searching {} hyperparameters", self.algorithm))?;
        log::info!(
            "Best {} score {:.4} with {}",
            self.algorithm,
            outcome.best_score,
            outcome.best_params.to_value()
        );

        let proba = outcome.best_estimator.predict_proba(x.view())?;
        let report = evaluate(&[proba], &y.to_vec())?;
        let ids = report.class_ids();
        let report = report.with_class_names(&ids, encoding.decode_all(&ids)?);

        let curve = if self.options.learning_curve {
            Some(learning_curve(
                &outcome.best_params,
                x.view(),
                y.view(),
                n_classes,
                StratifiedKFold::new(self.options.cv_folds),
            )?)
        } else {
            None
        };

        let bundle = ModelBundle {
            estimator: outcome.best_estimator,
            vectorizer,
            metadata: BundleMetadata {
                algorithm: self.algorithm,
                encoding,
                model_params: outcome.best_params,
                trained_label: TrainedLabel { label, filter },
                trained_texts,
                vectorizer_params: self.vectorizer_params.clone(),
                normalized: self.options.normalize,
            },
        };
        let directory = bundle
            .save(&self.options.output_root, Local::now())
            .with_context(|| format!("saving model under {}", self.options.output_root.display()))?;

        if let Some(curve) = &curve {
            log_learning_curve(curve);
            if self.options.plot {
                render_learning_curve(curve, &directory)?;
            }
        }

        Ok(TrainOutcome {
            bundle,
            directory,
            best_score: outcome.best_score,
            report,
            learning_curve: curve,
        })
    }
}

fn log_learning_curve(curve: &LearningCurve) {
    let test = curve.test_summary();
    for (size, (mean, std)) in curve.train_sizes.iter().zip(test) {
        log::info!("learning curve: {size} rows -> {mean:.3} (+/-{:.3})", std * 2.0);
    }
}

fn render_learning_curve(curve: &LearningCurve, directory: &Path) -> Result<()> {
    let path = directory.join(LEARNING_CURVE_FILE);
    plot::plot_learning_curve(curve, &path)?;
    log::info!("Learning curve written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const FIRST: &str = "\
,Events,Report 1,,Report 2,
ACN,Anomaly,Narrative,Callback,Narrative,Callback
1,Deviation,altitude deviation during climb,,,
2,Conflict,traffic conflict tcas alert,,,
3,Deviation,climb past assigned altitude,,,
4,Conflict,converging traffic on final,,,
5,Deviation,altitude bust after autopilot disconnect,,,
6,Conflict,tcas resolution advisory traffic,,,
";

    const SECOND: &str = "\
,Events,Report 1,,Report 2,
ACN,Anomaly,Narrative,Callback,Narrative,Callback
7,Deviation,overshot altitude in climb,,,
8,Conflict,traffic alert on downwind,,,
9,Deviation,level bust altitude,,,
10,Conflict,near miss traffic conflict,,,
11,Deviation,altitude deviation descent,,,
12,Conflict,tcas traffic advisory,,,
";

    fn options(root: &Path) -> TrainOptions {
        TrainOptions {
            output_root: root.to_path_buf(),
            ..TrainOptions::default()
        }
    }

    #[test]
    fn retraining_accumulates_trained_texts() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, FIRST).unwrap();
        fs::write(&b, SECOND).unwrap();

        let first_root = dir.path().join("first");
        let first = Trainer::new(Algorithm::Mnb, options(&first_root))
            .train_report_classification(std::slice::from_ref(&a), Some("Events_Anomaly"), None)
            .unwrap();
        assert_eq!(first.bundle.metadata.trained_texts.paths(), &[a.clone()]);

        let loaded = ModelBundle::load(&first.directory).unwrap();
        let second_root = dir.path().join("second");
        let second = Trainer::resume(loaded, options(&second_root))
            .train_report_classification(std::slice::from_ref(&b), None, None)
            .unwrap();
        assert_eq!(second.bundle.metadata.trained_texts.paths(), &[a, b]);
        assert_eq!(second.bundle.metadata.trained_label.label, "Events_Anomaly");
        assert!(second.directory.starts_with(&second_root));
    }

    #[test]
    fn training_saves_a_loadable_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        fs::write(&a, FIRST).unwrap();

        let outcome = Trainer::new(Algorithm::Gauss, options(dir.path()))
            .train_report_classification(
                &[a],
                Some("Events_Anomaly"),
                Some(LabelFilter::new(["Deviation", "Conflict"])),
            )
            .unwrap();
        assert!(outcome.best_score >= 0.0 && outcome.best_score <= 1.0);
        assert_eq!(outcome.report.models, 1);
        let mut names: Vec<&str> = outcome.report.class_names.values().map(String::as_str).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Conflict", "Deviation"]);

        let name = outcome.directory.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("asrs_classifier-gauss-"));
        let loaded = ModelBundle::load(&outcome.directory).unwrap();
        assert_eq!(loaded.metadata.encoding.len(), 2);
        assert_eq!(loaded.metadata.trained_label.filter.values().count(), 2);
    }

    #[test]
    fn new_model_needs_a_label() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        fs::write(&a, FIRST).unwrap();
        let err = Trainer::new(Algorithm::Mnb, options(dir.path()))
            .train_report_classification(&[a], None, None)
            .unwrap_err();
        assert!(err.to_string().contains("label"));
    }

    #[test]
    fn learning_curve_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        fs::write(&a, FIRST).unwrap();
        let outcome = Trainer::new(
            Algorithm::Mnb,
            TrainOptions {
                learning_curve: true,
                cv_folds: 2,
                ..options(dir.path())
            },
        )
        .train_report_classification(&[a], Some("Events_Anomaly"), None)
        .unwrap();
        let curve = outcome.learning_curve.unwrap();
        assert_eq!(curve.test_scores.len(), curve.train_sizes.len());
    }
}
