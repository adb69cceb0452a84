use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::classify::bundle::ModelBundle;
use crate::classify::evaluator::{EvaluationReport, ensemble_probabilities, evaluate, roc_curve};
use crate::classify::predictor::Predictor;
use crate::classify::trainer::{TrainOptions, TrainOutcome, Trainer};
use crate::config::{Mode, RunConfig};
use crate::features::tfidf::VectorizerParams;
use crate::plot;

/// ROC image written by test mode under the output directory.
pub const ROC_FILE: &str = "roc_curve.png";

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config: &RunConfig) -> Result<()> {
    let deviation_rate = deviation_rate(config);
    match config.mode {
        Mode::Train => {
            for outcome in train(config, deviation_rate)? {
                println!("Model saved to {}", outcome.directory.display());
                println!("Best cross-validation accuracy: {:.2}%", outcome.best_score * 100.0);
                println!("On the training reports:");
                print!("{}", outcome.report);
            }
        }
        Mode::Test => {
            for (dir, labels) in label_free_texts(config)? {
                println!("{}:", dir.display());
                for (text, label) in config.free_texts.iter().zip(labels) {
                    println!("  {label}: {text}");
                }
            }
            if config.evaluates() {
                let report = test(config, deviation_rate)?;
                print!("{report}");
            }
        }
    }
    Ok(())
}

/// Spread applied to the minority-class count when normalizing, within 5%.
fn deviation_rate(config: &RunConfig) -> f64 {
    if config.normalize {
        StdRng::seed_from_u64(config.seed).gen_range(0.95..1.05)
    } else {
        1.0
    }
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

/// Train a new model, or continue every given one, on the configured texts.
pub fn train(config: &RunConfig, deviation_rate: f64) -> Result<Vec<TrainOutcome>> {
    log::debug!("Training");
    let options = TrainOptions {
        normalize: config.normalize,
        deviation_rate,
        seed: config.seed,
        cv_folds: config.folds,
        output_root: config.output_dir.clone(),
        vectorizer_params: VectorizerParams {
            max_features: config.max_features,
            ..VectorizerParams::default()
        },
        learning_curve: config.learning_curve,
        plot: config.plot,
    };

    let trainers = if config.models.is_empty() {
        vec![Trainer::new(config.algorithm, options)]
    } else {
        config
            .models
            .iter()
            .map(|dir| {
                let bundle = ModelBundle::load(dir)
                    .with_context(|| format!("loading model from {}", dir.display()))?;
                Ok(Trainer::resume(bundle, options.clone()))
            })
            .collect::<Result<Vec<_>>>()?
    };

    trainers
        .iter()
        .map(|trainer| {
            trainer
                .train_report_classification(
                    &config.texts,
                    config.label.as_deref(),
                    config.filter.clone(),
                )
                .with_context(|| format!("training a {} model", trainer.algorithm()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Testing
// ---------------------------------------------------------------------------

/// Ensemble the given models' predictions on the test texts and score them.
pub fn test(config: &RunConfig, deviation_rate: f64) -> Result<EvaluationReport> {
    if config.models.is_empty() {
        bail!("the path to the model cannot be empty for testing");
    }
    let texts = config.test_texts();
    log::debug!(
        "Testing on {}{}",
        if config.normalize { "normalized " } else { "" },
        texts
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut predictions = Vec::with_capacity(config.models.len());
    let mut targets: Option<Array1<usize>> = None;
    let mut first: Option<Predictor> = None;
    for dir in &config.models {
        let predictor = Predictor::load(dir)
            .with_context(|| format!("loading model from {}", dir.display()))?
            .with_normalization(config.normalize, deviation_rate, config.seed);
        let (proba, model_targets) = predictor.predict_report_class(
            &texts,
            config.label.as_deref(),
            config.filter.as_ref(),
        )?;
        predictions.push(proba);
        match &targets {
            None => targets = Some(model_targets),
            Some(first) if *first != model_targets => {
                bail!(
                    "{} selects different test reports than the first model; ensembled models must share label and filter",
                    dir.display()
                );
            }
            Some(_) => {}
        }
        first.get_or_insert(predictor);
    }
    let targets = targets.map(|t| t.to_vec()).unwrap_or_default();
    if predictions.len() > 1 {
        log::debug!("{} models ensembling", predictions.len());
    }

    if config.plot {
        plot_roc(&predictions, &targets, &config.output_dir)?;
    }
    let report = evaluate(&predictions, &targets)?;
    let ids = report.class_ids();
    match first {
        Some(predictor) => {
            let names = predictor.decode_predictions(&ids)?;
            Ok(report.with_class_names(&ids, names))
        }
        None => Ok(report),
    }
}

/// Predicted label of every free text, per model directory.
pub fn label_free_texts(config: &RunConfig) -> Result<Vec<(PathBuf, Vec<String>)>> {
    if config.free_texts.is_empty() {
        return Ok(Vec::new());
    }
    config
        .models
        .iter()
        .map(|dir| {
            let predictor = Predictor::load(dir)
                .with_context(|| format!("loading model from {}", dir.display()))?;
            let labels = config
                .free_texts
                .iter()
                .map(|text| predictor.label_text(text))
                .collect::<crate::error::Result<Vec<_>>>()
                .with_context(|| format!("labelling free texts with {}", dir.display()))?;
            Ok((dir.clone(), labels))
        })
        .collect()
}

/// ROC of the ensembled class-1 probabilities, treating class 1 as positive.
fn plot_roc(predictions: &[Array2<f64>], targets: &[usize], output_dir: &Path) -> Result<()> {
    let mean = ensemble_probabilities(predictions)?;
    if mean.ncols() < 2 {
        log::warn!("ROC needs at least two classes, skipping the plot");
        return Ok(());
    }
    let scores = mean.column(1).to_vec();
    let positives: Vec<bool> = targets.iter().map(|&t| t == 1).collect();
    let curve = match roc_curve(&scores, &positives) {
        Ok(curve) => curve,
        Err(err) => {
            log::warn!("skipping the ROC plot: {err}");
            return Ok(());
        }
    };

    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let path: PathBuf = output_dir.join(ROC_FILE);
    plot::plot_roc(&curve, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::algorithm::Algorithm;
    use crate::config::Split;

    const TRAIN: &str = "\
,Events,Report 1,,Report 2,
ACN,Anomaly,Narrative,Callback,Narrative,Callback
1,Deviation - Altitude,altitude deviation during climb,,,
2,Conflict,traffic conflict tcas alert,,,
3,Deviation - Altitude,climb past assigned altitude,,,
4,Conflict,converging traffic on final,,,
5,Deviation - Altitude,altitude bust after autopilot disconnect,,,
6,Conflict; Deviation - Altitude,tcas resolution advisory traffic,,,
7,Deviation - Altitude,overshot altitude in the climb,,,
8,Conflict,traffic alert on downwind,,,
9,Deviation - Altitude,level bust altitude,,,
10,Conflict,near miss traffic conflict,,,
";

    const TEST: &str = "\
,Events,Report 1,,Report 2,
ACN,Anomaly,Narrative,Callback,Narrative,Callback
11,Deviation - Altitude,altitude deviation in descent,,,
12,Conflict,tcas traffic advisory,,,
13,Inflight Event,bird strike,,,
14,Conflict,traffic conflict on approach,,,
";

    fn config(mode: Mode, root: &Path) -> RunConfig {
        RunConfig {
            mode,
            models: Vec::new(),
            texts: Vec::new(),
            free_texts: Vec::new(),
            label: Some("Events_Anomaly".into()),
            filter: None,
            algorithm: Algorithm::Mnb,
            normalize: false,
            plot: false,
            learning_curve: false,
            split: Split::Test,
            output_dir: root.join("classifiers"),
            folds: 5,
            seed: 6240,
            max_features: 2000,
        }
    }

    #[test]
    fn train_then_test_ensemble() {
        let dir = tempfile::tempdir().unwrap();
        let train_path = dir.path().join("ASRS_train.csv");
        let test_path = dir.path().join("ASRS_test.csv");
        fs::write(&train_path, TRAIN).unwrap();
        fs::write(&test_path, TEST).unwrap();

        let mut train_config = config(Mode::Train, dir.path());
        train_config.texts = vec![train_path];
        let outcomes = train(&train_config, 1.0).unwrap();
        assert_eq!(outcomes.len(), 1);
        let model_dir = outcomes[0].directory.clone();

        let mut test_config = config(Mode::Test, dir.path());
        test_config.models = vec![model_dir.clone(), model_dir];
        test_config.texts = vec![test_path];
        test_config.plot = true;
        let report = test(&test_config, 1.0).unwrap();
        assert_eq!(report.models, 2);
        // the inflight event is unknown to the model and dropped
        assert_eq!(report.confusion.counts.sum(), 3);
        assert!(test_config.output_dir.join(ROC_FILE).is_file());

        let text = report.to_string();
        assert!(text.contains("Classes:"));
        assert!(text.contains("(Conflict):"));
        assert!(text.contains("(Deviation - Altitude):"));
    }

    #[test]
    fn free_texts_are_labelled_per_model() {
        let dir = tempfile::tempdir().unwrap();
        let train_path = dir.path().join("ASRS_train.csv");
        fs::write(&train_path, TRAIN).unwrap();
        let mut train_config = config(Mode::Train, dir.path());
        train_config.texts = vec![train_path];
        let model_dir = train(&train_config, 1.0).unwrap().remove(0).directory;

        let mut test_config = config(Mode::Test, dir.path());
        test_config.models = vec![model_dir.clone()];
        test_config.free_texts = vec!["tcas traffic conflict".into(), "altitude bust in the climb".into()];
        assert!(!test_config.evaluates());
        let labelled = label_free_texts(&test_config).unwrap();
        assert_eq!(labelled.len(), 1);
        assert_eq!(labelled[0].0, model_dir);
        assert_eq!(labelled[0].1, vec!["Conflict", "Deviation - Altitude"]);
    }

    #[test]
    fn testing_without_models_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(test(&config(Mode::Test, dir.path()), 1.0).is_err());
    }

    #[test]
    fn deviation_rate_stays_within_five_percent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(Mode::Train, dir.path());
        assert_eq!(deviation_rate(&config), 1.0);
        config.normalize = true;
        let rate = deviation_rate(&config);
        assert!((0.95..1.05).contains(&rate));
    }
}
