use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Result, bail};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;

use crate::classify::encoding::Encoding;
use crate::data::filter::{LabelFilter, filtered_labels};
use crate::data::loader::extract_columns;
use crate::data::model::LineWindow;

use super::tfidf::TfidfVectorizer;

/// Columns whose non-empty values make up the text of a report.
pub const NARRATIVE_COLUMNS: [&str; 4] = [
    "Report 1_Narrative",
    "Report 1_Callback",
    "Report 2_Narrative",
    "Report 2_Callback",
];

/// Turns ASRS files into a TF-IDF matrix and integer targets, keeping the
/// label encoding and the fitted vectorizer between calls.
#[derive(Debug, Clone)]
pub struct ReportPreprocessor {
    vectorizer: TfidfVectorizer,
    encoding: Encoding,
    deviation_rate: f64,
    seed: u64,
}

impl ReportPreprocessor {
    pub fn new(vectorizer: TfidfVectorizer, encoding: Encoding) -> Self {
        Self {
            vectorizer,
            encoding,
            deviation_rate: 1.0,
            seed: 6240,
        }
    }

    /// Scale applied to the minority-class count when undersampling, and the
    /// seed of the row selection.
    pub fn with_normalization(mut self, deviation_rate: f64, seed: u64) -> Self {
        self.deviation_rate = deviation_rate;
        self.seed = seed;
        self
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    #[cfg(test)]
    pub fn vectorizer(&self) -> &TfidfVectorizer {
        &self.vectorizer
    }

    pub fn into_parts(self) -> (TfidfVectorizer, Encoding) {
        (self.vectorizer, self.encoding)
    }

    /// Read the report texts and `label` values of every file.
    ///
    /// With `train` set, unseen labels extend the encoding and the vectorizer
    /// is refitted on the texts. Otherwise rows whose label the encoding does
    /// not know are dropped.
    pub fn vectorize_texts(
        &mut self,
        paths: &[PathBuf],
        label: &str,
        train: bool,
        filter: &LabelFilter,
        normalize: bool,
    ) -> Result<(Array2<f64>, Array1<usize>)> {
        let (texts, labels) = read_labelled_texts(paths, label, filter)?;
        if texts.is_empty() {
            bail!("no report with a \"{label}\" value passing the filter was found");
        }

        if train {
            self.encoding.extend_with(labels.iter().map(String::as_str));
        }

        let mut kept_texts = Vec::with_capacity(texts.len());
        let mut targets = Vec::with_capacity(texts.len());
        let mut unknown = 0;
        for (text, value) in texts.into_iter().zip(&labels) {
            match self.encoding.id_of(value) {
                Some(id) => {
                    kept_texts.push(text);
                    targets.push(id);
                }
                None => unknown += 1,
            }
        }
        if unknown > 0 {
            log::warn!("{unknown} report(s) with labels unknown to the model were skipped");
        }

        if normalize {
            let keep = self.undersample(&targets);
            kept_texts = keep.iter().map(|&i| kept_texts[i].clone()).collect();
            targets = keep.iter().map(|&i| targets[i]).collect();
        }
        if kept_texts.is_empty() {
            bail!("none of the \"{label}\" values is known to the model");
        }

        if train {
            self.vectorizer.fit(&kept_texts)?;
        }
        let matrix = self.vectorizer.transform(&kept_texts)?;

        let (counts, fractions) = data_distribution(&targets, self.encoding.len());
        log::debug!("class counts {counts:?}, fractions {fractions:.3?}");

        Ok((matrix, Array1::from(targets)))
    }

    /// Indices of the rows kept when every class is cut down to the
    /// minority-class count scaled by the deviation rate.
    fn undersample(&self, targets: &[usize]) -> Vec<usize> {
        let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, &class) in targets.iter().enumerate() {
            by_class.entry(class).or_default().push(row);
        }
        let Some(minority) = by_class.values().map(Vec::len).min() else {
            return Vec::new();
        };
        let cap = ((minority as f64 * self.deviation_rate).round() as usize).max(1);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut keep = Vec::with_capacity(cap * by_class.len());
        for rows in by_class.values() {
            if rows.len() <= cap {
                keep.extend(rows);
            } else {
                keep.extend(index::sample(&mut rng, rows.len(), cap).iter().map(|i| rows[i]));
            }
        }
        keep.sort_unstable();
        log::info!(
            "normalized {} classes to at most {cap} reports each ({} of {} kept)",
            by_class.len(),
            keep.len(),
            targets.len()
        );
        keep
    }
}

/// Report texts and the selected label value of every row that has both.
fn read_labelled_texts(
    paths: &[PathBuf],
    label: &str,
    filter: &LabelFilter,
) -> Result<(Vec<String>, Vec<String>)> {
    let mut fields = vec![label];
    fields.extend(NARRATIVE_COLUMNS);

    let mut texts = Vec::new();
    let mut labels = Vec::new();
    // One file at a time so label and narrative rows stay aligned even when
    // a file lacks some of the narrative columns.
    for path in paths {
        let columns = extract_columns(std::slice::from_ref(path), &fields, LineWindow::default())?;
        let Some(cells) = columns.get(label) else {
            continue;
        };
        for (row, value) in filtered_labels(cells, filter) {
            let text = NARRATIVE_COLUMNS
                .iter()
                .filter_map(|column| columns.get(*column).and_then(|values| values.get(row)))
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                continue;
            }
            texts.push(text);
            labels.push(value.to_string());
        }
    }
    Ok((texts, labels))
}

/// Per-class counts and fractions of `targets` over `n_classes` ids.
pub fn data_distribution(targets: &[usize], n_classes: usize) -> (Vec<usize>, Vec<f64>) {
    let width = targets
        .iter()
        .max()
        .map_or(n_classes, |max| n_classes.max(max + 1));
    let mut counts = vec![0; width];
    for &class in targets {
        counts[class] += 1;
    }
    let total = targets.len().max(1) as f64;
    let fractions = counts.iter().map(|&c| c as f64 / total).collect();
    (counts, fractions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tfidf::VectorizerParams;
    use std::fs;

    const REPORTS: &str = "\
,Events,Report 1,,Report 2,
ACN,Anomaly,Narrative,Callback,Narrative,Callback
1,Deviation - Altitude; Conflict,We climbed through our assigned altitude.,,,
2,Conflict,TCAS RA during descent.,Traffic was close.,,
3,Deviation - Altitude,Autopilot captured the wrong altitude.,,Captain noticed late.,
4,Inflight Event,Bird strike on takeoff.,,,
5,Conflict,,,,
6,Conflict,Converging traffic on final approach.,,,
";

    fn write_reports(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("ASRS_train.csv");
        fs::write(&path, REPORTS).unwrap();
        path
    }

    fn preprocessor() -> ReportPreprocessor {
        ReportPreprocessor::new(
            TfidfVectorizer::new(VectorizerParams::default()),
            Encoding::default(),
        )
    }

    #[test]
    fn training_builds_encoding_and_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_reports(&dir);
        let filter = LabelFilter::new(["Deviation - Altitude", "Conflict"]);

        let mut pre = preprocessor();
        let (x, y) = pre
            .vectorize_texts(&[path], "Events_Anomaly", true, &filter, false)
            .unwrap();

        // report 4 is filtered out, report 5 has no text
        assert_eq!(x.nrows(), 4);
        assert_eq!(pre.encoding().len(), 2);
        assert_eq!(pre.encoding().id_of("Conflict"), Some(0));
        assert_eq!(y.to_vec(), vec![1, 0, 1, 0]);
        assert!(pre.vectorizer().is_fitted());
    }

    #[test]
    fn prediction_drops_unknown_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_reports(&dir);
        let mut pre = preprocessor();
        pre.vectorize_texts(
            std::slice::from_ref(&path),
            "Events_Anomaly",
            true,
            &LabelFilter::new(["Conflict"]),
            false,
        )
        .unwrap();

        let (x, y) = pre
            .vectorize_texts(&[path], "Events_Anomaly", false, &LabelFilter::default(), false)
            .unwrap();
        assert_eq!(x.nrows(), 2);
        assert!(y.iter().all(|&id| id == 0));
    }

    #[test]
    fn normalization_caps_majority_class() {
        let mut pre = preprocessor().with_normalization(1.0, 7);
        let keep = pre.undersample(&[0, 0, 0, 0, 1, 1]);
        assert_eq!(keep.len(), 4);
        assert_eq!(keep.iter().filter(|&&row| row >= 4).count(), 2);

        let dir = tempfile::tempdir().unwrap();
        let path = write_reports(&dir);
        let (x, y) = pre
            .vectorize_texts(&[path], "Events_Anomaly", true, &LabelFilter::default(), true)
            .unwrap();
        let (counts, _) = data_distribution(&y.to_vec(), pre.encoding().len());
        assert_eq!(x.nrows(), counts.iter().sum::<usize>());
        assert!(counts.iter().all(|&c| c == 1));
    }

    #[test]
    fn distribution_fractions() {
        let (counts, fractions) = data_distribution(&[0, 1, 1, 1], 3);
        assert_eq!(counts, vec![1, 3, 0]);
        assert_eq!(fractions, vec![0.25, 0.75, 0.0]);
    }
}
