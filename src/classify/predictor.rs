use std::path::{Path, PathBuf};

use anyhow::Context;
use ndarray::{Array1, Array2, ArrayView2};

use crate::data::filter::LabelFilter;
use crate::error::{ClassifierError, Result};
use crate::features::preprocess::{ReportPreprocessor, data_distribution};

use super::bundle::ModelBundle;
use super::estimator::{Classifier, argmax_rows};

/// Output of [`Predictor::predict`].
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// One row per sample, one column per encoded class.
    Probabilities(Array2<f64>),
    Labels(Array1<usize>),
}

impl Prediction {
    /// Hard labels, taking the most probable class of each row.
    pub fn into_labels(self) -> Array1<usize> {
        match self {
            Prediction::Probabilities(proba) => argmax_rows(&proba),
            Prediction::Labels(labels) => labels,
        }
    }
}

/// Scores texts with a loaded bundle, reproducing its training-time
/// vectorization.
#[derive(Debug, Clone)]
pub struct Predictor {
    bundle: ModelBundle,
    normalize: bool,
    deviation_rate: f64,
    seed: u64,
}

impl Predictor {
    pub fn from_bundle(bundle: ModelBundle) -> Self {
        let normalize = bundle.metadata.normalized;
        Self {
            bundle,
            normalize,
            deviation_rate: 1.0,
            seed: 6240,
        }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self::from_bundle(ModelBundle::load(dir)?))
    }

    /// Undersample the evaluation rows the same way training data is.
    pub fn with_normalization(mut self, normalize: bool, deviation_rate: f64, seed: u64) -> Self {
        self.normalize = normalize;
        self.deviation_rate = deviation_rate;
        self.seed = seed;
        self
    }

    fn ensure_ready(&self) -> Result<()> {
        if !self.bundle.estimator.is_fitted() {
            return Err(ClassifierError::NotFitted("model"));
        }
        if !self.bundle.vectorizer.is_fitted() {
            return Err(ClassifierError::NotFitted("vectorizer"));
        }
        Ok(())
    }

    /// Class probabilities and true targets for the reports in `paths`.
    ///
    /// `label` and `filter` default to the ones the bundle was trained with.
    pub fn predict_report_class(
        &self,
        paths: &[PathBuf],
        label: Option<&str>,
        filter: Option<&LabelFilter>,
    ) -> anyhow::Result<(Array2<f64>, Array1<usize>)> {
        self.ensure_ready()?;
        let trained = &self.bundle.metadata.trained_label;
        let label = label.unwrap_or(trained.label.as_str());
        let filter = filter.unwrap_or(&trained.filter);

        let mut preprocessor = ReportPreprocessor::new(
            self.bundle.vectorizer.clone(),
            self.bundle.metadata.encoding.clone(),
        )
        .with_normalization(self.deviation_rate, self.seed);
        let (x, targets) = preprocessor
            .vectorize_texts(paths, label, false, filter, self.normalize)
            .with_context(|| format!("vectorizing \"{label}\" test reports"))?;

        let (_, fractions) = data_distribution(&targets.to_vec(), preprocessor.encoding().len());
        log::info!("Test data distribution {fractions:.3?}");
        log::info!("Test data shape: {:?}", x.dim());

        let proba = self.bundle.estimator.predict_proba(x.view())?;
        Ok((proba, targets))
    }

    pub fn predict(&self, x: ArrayView2<f64>, proba: bool) -> Result<Prediction> {
        self.ensure_ready()?;
        let estimator = &self.bundle.estimator;
        if proba {
            log::info!("Probability predictions made using a {} model", estimator.algorithm());
            Ok(Prediction::Probabilities(estimator.predict_proba(x)?))
        } else {
            log::info!("Predictions made using a {} model", estimator.algorithm());
            Ok(Prediction::Labels(estimator.predict(x)?))
        }
    }

    pub fn decode_predictions(&self, predictions: &[usize]) -> Result<Vec<String>> {
        self.bundle.metadata.encoding.decode_all(predictions)
    }

    /// Predicted label of one free text.
    pub fn label_text(&self, text: &str) -> Result<String> {
        self.ensure_ready()?;
        let row = self.bundle.vectorizer.transform(&[text.to_string()])?;
        let predicted = self.predict(row.view(), false)?.into_labels();
        let id = predicted
            .first()
            .copied()
            .ok_or_else(|| ClassifierError::InvalidInput("empty prediction".into()))?;
        Ok(self.bundle.metadata.encoding.decode(id)?.to_string())
    }
}
