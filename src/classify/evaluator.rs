//! Ensembling of probability matrices, evaluation reports against
//! constant-class baselines, and ROC curves.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ndarray::{Array1, Array2};

use crate::error::{ClassifierError, Result};

use super::estimator::argmax_rows;
use super::metrics::{Average, ConfusionMatrix, accuracy, f1, precision, recall};

/// Baselines are only reported for problems with fewer classes than this.
const MAX_BASELINE_CLASSES: usize = 5;

// ---------------------------------------------------------------------------
// Ensembling
// ---------------------------------------------------------------------------

/// Element-wise mean of the per-model probability matrices.
pub fn ensemble_probabilities(predictions: &[Array2<f64>]) -> Result<Array2<f64>> {
    let Some(first) = predictions.first() else {
        return Err(ClassifierError::InvalidInput(
            "no predictions to ensemble".into(),
        ));
    };
    let mut sum = Array2::<f64>::zeros(first.raw_dim());
    for matrix in predictions {
        if matrix.dim() != first.dim() {
            return Err(ClassifierError::InvalidInput(format!(
                "prediction shapes differ: {:?} vs {:?}",
                matrix.dim(),
                first.dim()
            )));
        }
        sum += matrix;
    }
    Ok(sum / predictions.len() as f64)
}

/// Hard labels of the ensembled probabilities.
pub fn ensemble_predictions(predictions: &[Array2<f64>]) -> Result<Array1<usize>> {
    Ok(argmax_rows(&ensemble_probabilities(predictions)?))
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSummary {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
}

impl MetricSummary {
    fn compute(y_true: &[usize], y_pred: &[usize], average: Average, zero_division: f64) -> Self {
        Self {
            accuracy: accuracy(y_true, y_pred),
            precision: precision(y_true, y_pred, average, zero_division),
            recall: recall(y_true, y_pred, average, 0.0),
            f1: f1(y_true, y_pred, average, 0.0),
            macro_precision: precision(y_true, y_pred, Average::Macro, zero_division),
            macro_recall: recall(y_true, y_pred, Average::Macro, 0.0),
            macro_f1: f1(y_true, y_pred, Average::Macro, 0.0),
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, average: Average) -> fmt::Result {
        let pct = |v: f64| v * 100.0;
        writeln!(f, "  Accuracy:          {:.2}%", pct(self.accuracy))?;
        writeln!(f, "  Precision ({average}): {:.2}%", pct(self.precision))?;
        writeln!(f, "  Recall ({average}):    {:.2}%", pct(self.recall))?;
        writeln!(f, "  F1 ({average}):        {:.2}%", pct(self.f1))?;
        writeln!(f, "  Precision (macro): {:.2}%", pct(self.macro_precision))?;
        writeln!(f, "  Recall (macro):    {:.2}%", pct(self.macro_recall))?;
        writeln!(f, "  F1 (macro):        {:.2}%", pct(self.macro_f1))
    }
}

/// Scores of always predicting `class`.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineReport {
    pub class: usize,
    pub metrics: MetricSummary,
}

#[derive(Debug, Clone)]
pub struct EvaluationReport {
    /// Number of models whose predictions were ensembled.
    pub models: usize,
    pub average: Average,
    pub confusion: ConfusionMatrix,
    pub model: MetricSummary,
    pub baselines: Vec<BaselineReport>,
    /// Decoded label of each class id; empty prints bare ids.
    pub class_names: BTreeMap<usize, String>,
}

impl EvaluationReport {
    /// Class ids the report mentions, sorted.
    pub fn class_ids(&self) -> Vec<usize> {
        self.confusion
            .labels
            .iter()
            .copied()
            .chain(self.baselines.iter().map(|b| b.class))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn with_class_names(mut self, ids: &[usize], names: Vec<String>) -> Self {
        self.class_names = ids.iter().copied().zip(names).collect();
        self
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Evaluation of {} model(s)", self.models)?;
        if !self.class_names.is_empty() {
            writeln!(f, "Classes:")?;
            for (id, name) in &self.class_names {
                writeln!(f, "  {id}: {name}")?;
            }
        }
        writeln!(f, "Confusion matrix (rows: truth, columns: prediction):")?;
        write!(f, "{}", self.confusion)?;
        writeln!(f, "Model:")?;
        self.model.write(f, self.average)?;
        for baseline in &self.baselines {
            match self.class_names.get(&baseline.class) {
                Some(name) => writeln!(f, "Baseline, always class {} ({name}):", baseline.class)?,
                None => writeln!(f, "Baseline, always class {}:", baseline.class)?,
            }
            baseline.metrics.write(f, self.average)?;
        }
        Ok(())
    }
}

/// Score ensembled predictions against the ground truth.
///
/// Two distinct truth labels switch the headline scores to binary averaging,
/// anything else uses micro averaging; macro averages are always included.
pub fn evaluate(predictions: &[Array2<f64>], targets: &[usize]) -> Result<EvaluationReport> {
    let predicted = ensemble_predictions(predictions)?;
    if predicted.len() != targets.len() {
        return Err(ClassifierError::InvalidInput(format!(
            "{} predictions for {} targets",
            predicted.len(),
            targets.len()
        )));
    }
    let predicted = predicted.to_vec();

    let n_unique = targets.iter().collect::<BTreeSet<_>>().len();
    let average = if n_unique == 2 {
        Average::Binary
    } else {
        Average::Micro
    };

    let baselines = if n_unique < MAX_BASELINE_CLASSES {
        (0..n_unique)
            .map(|class| BaselineReport {
                class,
                metrics: MetricSummary::compute(targets, &vec![class; targets.len()], average, 1.0),
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(EvaluationReport {
        models: predictions.len(),
        average,
        confusion: ConfusionMatrix::new(targets, &predicted),
        model: MetricSummary::compute(targets, &predicted, average, 0.0),
        baselines,
        class_names: BTreeMap::new(),
    })
}

// ---------------------------------------------------------------------------
// ROC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    pub thresholds: Vec<f64>,
    pub auc: f64,
}

/// ROC of positive-class `scores` against `positives` (true = positive).
/// Tied scores form a single point; the curve starts at (0, 0).
pub fn roc_curve(scores: &[f64], positives: &[bool]) -> Result<RocCurve> {
    if scores.len() != positives.len() || scores.is_empty() {
        return Err(ClassifierError::InvalidInput(
            "ROC needs one non-empty score per target".into(),
        ));
    }
    let total_pos = positives.iter().filter(|p| **p).count();
    let total_neg = positives.len() - total_pos;
    if total_pos == 0 || total_neg == 0 {
        return Err(ClassifierError::InvalidInput(
            "ROC needs both positive and negative targets".into(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let mut thresholds = vec![f64::INFINITY];
    let (mut tp, mut fp) = (0usize, 0usize);
    for (pos, &idx) in order.iter().enumerate() {
        if positives[idx] {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_tie = order
            .get(pos + 1)
            .map_or(true, |&next| scores[next] != scores[idx]);
        if last_of_tie {
            fpr.push(fp as f64 / total_neg as f64);
            tpr.push(tp as f64 / total_pos as f64);
            thresholds.push(scores[idx]);
        }
    }

    let auc = fpr
        .windows(2)
        .zip(tpr.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[1] + y[0]) / 2.0)
        .sum();

    Ok(RocCurve {
        fpr,
        tpr,
        thresholds,
        auc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn baseline_zero_accuracy_is_share_of_zeros() {
        let targets = [0, 0, 1, 1, 1];
        let proba = array![[0.9, 0.1], [0.2, 0.8], [0.3, 0.7], [0.4, 0.6], [0.6, 0.4]];
        let report = evaluate(&[proba], &targets).unwrap();
        assert_eq!(report.average, Average::Binary);
        assert_eq!(report.baselines.len(), 2);
        assert!((report.baselines[0].metrics.accuracy - 0.4).abs() < 1e-12);
        assert!((report.baselines[1].metrics.accuracy - 0.6).abs() < 1e-12);
        // always predicting the negative class: no positives predicted
        assert_eq!(report.baselines[0].metrics.precision, 1.0);
        assert!((report.model.accuracy - 0.6).abs() < 1e-12);
    }

    #[test]
    fn ensemble_is_argmax_of_mean() {
        let a = array![[0.9, 0.1], [0.4, 0.6], [0.2, 0.8]];
        let b = array![[0.2, 0.8], [0.8, 0.2], [0.3, 0.7]];
        let mean = ensemble_probabilities(&[a.clone(), b.clone()]).unwrap();
        assert!((mean[[0, 0]] - 0.55).abs() < 1e-12);
        let labels = ensemble_predictions(&[a, b]).unwrap();
        assert_eq!(labels.to_vec(), vec![0, 0, 1]);
    }

    #[test]
    fn ensemble_rejects_mismatched_shapes() {
        let a = array![[0.5, 0.5]];
        let b = array![[0.5, 0.5], [0.1, 0.9]];
        assert!(ensemble_probabilities(&[a, b]).is_err());
        assert!(ensemble_probabilities(&[]).is_err());
    }

    #[test]
    fn many_classes_use_micro_and_skip_baselines() {
        let targets = [0, 1, 2, 3, 4];
        let proba = Array2::<f64>::eye(5);
        let report = evaluate(&[proba], &targets).unwrap();
        assert_eq!(report.average, Average::Micro);
        assert!(report.baselines.is_empty());
        assert_eq!(report.model.accuracy, 1.0);
        assert!(report.to_string().contains("100.00%"));
    }

    #[test]
    fn class_names_label_the_baselines() {
        let targets = [0, 1, 1];
        let proba = array![[0.8, 0.2], [0.3, 0.7], [0.6, 0.4]];
        let report = evaluate(&[proba], &targets).unwrap();
        assert_eq!(report.class_ids(), vec![0, 1]);
        assert!(report.to_string().contains("Baseline, always class 1:"));

        let names = vec!["Conflict".to_string(), "Deviation".to_string()];
        let text = report.with_class_names(&[0, 1], names).to_string();
        assert!(text.contains("  1: Deviation"));
        assert!(text.contains("Baseline, always class 0 (Conflict):"));
    }

    #[test]
    fn roc_of_perfect_and_inverted_scores() {
        let positives = [false, false, true, true];
        let perfect = roc_curve(&[0.1, 0.2, 0.8, 0.9], &positives).unwrap();
        assert_eq!(perfect.auc, 1.0);
        assert_eq!(perfect.fpr.first(), Some(&0.0));
        assert_eq!(perfect.tpr.last(), Some(&1.0));

        let inverted = roc_curve(&[0.9, 0.8, 0.2, 0.1], &positives).unwrap();
        assert_eq!(inverted.auc, 0.0);

        let tied = roc_curve(&[0.5; 4], &positives).unwrap();
        assert_eq!(tied.fpr, vec![0.0, 1.0]);
        assert!((tied.auc - 0.5).abs() < 1e-12);
    }
}
