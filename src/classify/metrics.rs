//! Classification metrics over integer class ids.

use std::collections::BTreeSet;
use std::fmt;

use ndarray::Array2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Average {
    /// Scores of the positive class only: label 1 when `y_true` holds it,
    /// otherwise the largest label in `y_true`.
    Binary,
    /// Global true/false positive counts.
    Micro,
    /// Unweighted mean over every label seen in `y_true` or `y_pred`.
    Macro,
}

impl fmt::Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Average::Binary => "binary",
            Average::Micro => "micro",
            Average::Macro => "macro",
        })
    }
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let hits = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    hits as f64 / y_true.len() as f64
}

// ---------------------------------------------------------------------------
// Confusion matrix
// ---------------------------------------------------------------------------

/// Rows are true labels, columns predicted labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    pub labels: Vec<usize>,
    pub counts: Array2<usize>,
}

impl ConfusionMatrix {
    pub fn new(y_true: &[usize], y_pred: &[usize]) -> Self {
        let labels: Vec<usize> = y_true
            .iter()
            .chain(y_pred)
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let position = |label: usize| labels.binary_search(&label).unwrap_or(0);
        let mut counts = Array2::zeros((labels.len(), labels.len()));
        for (t, p) in y_true.iter().zip(y_pred) {
            counts[[position(*t), position(*p)]] += 1;
        }
        Self { labels, counts }
    }

    fn index_of(&self, label: usize) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    pub fn true_positives(&self, label: usize) -> usize {
        self.index_of(label).map_or(0, |i| self.counts[[i, i]])
    }

    pub fn false_positives(&self, label: usize) -> usize {
        self.index_of(label)
            .map_or(0, |i| self.counts.column(i).sum() - self.counts[[i, i]])
    }

    pub fn false_negatives(&self, label: usize) -> usize {
        self.index_of(label)
            .map_or(0, |i| self.counts.row(i).sum() - self.counts[[i, i]])
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .map(|c| c.to_string().len())
            .chain(self.labels.iter().map(|l| l.to_string().len()))
            .max()
            .unwrap_or(1);
        write!(f, "{:>width$}", "")?;
        for label in &self.labels {
            write!(f, " {label:>width$}")?;
        }
        writeln!(f)?;
        for (label, row) in self.labels.iter().zip(self.counts.rows()) {
            write!(f, "{label:>width$}")?;
            for count in row {
                write!(f, " {count:>width$}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Precision / recall / F1
// ---------------------------------------------------------------------------

fn ratio(numerator: usize, denominator: usize, zero_division: f64) -> f64 {
    if denominator == 0 {
        zero_division
    } else {
        numerator as f64 / denominator as f64
    }
}

const POSITIVE_LABEL: usize = 1;

fn positive_label(y_true: &[usize]) -> Option<usize> {
    if y_true.contains(&POSITIVE_LABEL) {
        Some(POSITIVE_LABEL)
    } else {
        y_true.iter().max().copied()
    }
}

/// Labels a score is averaged over.
fn scored_labels(matrix: &ConfusionMatrix, y_true: &[usize], average: Average) -> Vec<usize> {
    match average {
        Average::Binary => positive_label(y_true).into_iter().collect(),
        Average::Micro | Average::Macro => matrix.labels.clone(),
    }
}

fn averaged<F>(y_true: &[usize], y_pred: &[usize], average: Average, score: F) -> f64
where
    F: Fn(usize, usize, usize) -> f64,
{
    let matrix = ConfusionMatrix::new(y_true, y_pred);
    let labels = scored_labels(&matrix, y_true, average);
    if labels.is_empty() {
        return 0.0;
    }
    let counts = labels.iter().map(|&l| {
        (
            matrix.true_positives(l),
            matrix.false_positives(l),
            matrix.false_negatives(l),
        )
    });
    match average {
        Average::Micro => {
            let (tp, fp, fn_) = counts.fold((0, 0, 0), |acc, c| (acc.0 + c.0, acc.1 + c.1, acc.2 + c.2));
            score(tp, fp, fn_)
        }
        Average::Binary | Average::Macro => {
            counts.map(|(tp, fp, fn_)| score(tp, fp, fn_)).sum::<f64>() / labels.len() as f64
        }
    }
}

pub fn precision(y_true: &[usize], y_pred: &[usize], average: Average, zero_division: f64) -> f64 {
    averaged(y_true, y_pred, average, |tp, fp, _| ratio(tp, tp + fp, zero_division))
}

pub fn recall(y_true: &[usize], y_pred: &[usize], average: Average, zero_division: f64) -> f64 {
    averaged(y_true, y_pred, average, |tp, _, fn_| ratio(tp, tp + fn_, zero_division))
}

pub fn f1(y_true: &[usize], y_pred: &[usize], average: Average, zero_division: f64) -> f64 {
    averaged(y_true, y_pred, average, |tp, fp, fn_| {
        ratio(2 * tp, 2 * tp + fp + fn_, zero_division)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRUTH: [usize; 6] = [0, 0, 1, 1, 2, 2];
    const PRED: [usize; 6] = [0, 1, 1, 1, 2, 0];

    #[test]
    fn confusion_counts() {
        let m = ConfusionMatrix::new(&TRUTH, &PRED);
        assert_eq!(m.labels, vec![0, 1, 2]);
        assert_eq!(m.true_positives(1), 2);
        assert_eq!(m.false_positives(0), 1);
        assert_eq!(m.false_negatives(2), 1);
        assert_eq!(m.counts.sum(), 6);
    }

    #[test]
    fn micro_scores_equal_accuracy_for_single_label() {
        let acc = accuracy(&TRUTH, &PRED);
        assert!((acc - 4.0 / 6.0).abs() < 1e-12);
        assert!((precision(&TRUTH, &PRED, Average::Micro, 0.0) - acc).abs() < 1e-12);
        assert!((recall(&TRUTH, &PRED, Average::Micro, 0.0) - acc).abs() < 1e-12);
        assert!((f1(&TRUTH, &PRED, Average::Micro, 0.0) - acc).abs() < 1e-12);
    }

    #[test]
    fn macro_precision() {
        // label 0: 1/2, label 1: 2/3, label 2: 1/1
        let expected = (0.5 + 2.0 / 3.0 + 1.0) / 3.0;
        assert!((precision(&TRUTH, &PRED, Average::Macro, 0.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn binary_scores_label_one_with_zero_division() {
        let truth = [0, 0, 1, 1, 1];
        let always_zero = [0; 5];
        assert_eq!(precision(&truth, &always_zero, Average::Binary, 1.0), 1.0);
        assert_eq!(precision(&truth, &always_zero, Average::Binary, 0.0), 0.0);
        assert_eq!(recall(&truth, &always_zero, Average::Binary, 0.0), 0.0);

        let always_one = [1; 5];
        assert!((precision(&truth, &always_one, Average::Binary, 1.0) - 0.6).abs() < 1e-12);
        assert_eq!(recall(&truth, &always_one, Average::Binary, 1.0), 1.0);
        assert!((f1(&truth, &always_one, Average::Binary, 1.0) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn binary_positive_is_label_one_when_present() {
        // truth over {1, 2}: label 1 is positive, as with 0/1 targets
        let truth = [1, 1, 2, 2];
        let pred = [1, 2, 2, 2];
        assert_eq!(precision(&truth, &pred, Average::Binary, 0.0), 1.0);
        assert!((recall(&truth, &pred, Average::Binary, 0.0) - 0.5).abs() < 1e-12);

        // without label 1 the largest label is positive
        let truth = [0, 0, 2, 2];
        let pred = [0, 2, 2, 2];
        assert!((precision(&truth, &pred, Average::Binary, 0.0) - 2.0 / 3.0).abs() < 1e-12);
    }
}
