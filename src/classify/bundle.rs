//! On-disk model bundle: `classifier.model` (gzip-compressed bincode of the
//! estimator and its vectorizer) next to `parameters.json` (everything else).

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::filter::LabelFilter;
use crate::error::{ClassifierError, Result};
use crate::features::tfidf::{TfidfVectorizer, VectorizerParams};

use super::algorithm::{Algorithm, ModelParams};
use super::encoding::Encoding;
use super::estimator::Estimator;

pub const MODEL_FILE: &str = "classifier.model";
pub const PARAMETERS_FILE: &str = "parameters.json";
/// Longest generated directory name, in characters.
pub const NAME_LIMIT: usize = 100;

const NAME_PREFIX: &str = "asrs_classifier";
const NORMALIZED_SUFFIX: &str = ",norm";

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Every text file a bundle was ever trained on, in training order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingRecord(Vec<PathBuf>);

impl TrainingRecord {
    /// A new record with `paths` appended; `self` is left untouched.
    pub fn extended(&self, paths: &[PathBuf]) -> Self {
        let mut all = self.0.clone();
        all.extend_from_slice(paths);
        Self(all)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }
}

/// The trained label column and the value filter applied to it. Stored as
/// the single-entry object `{"<label>": [<values>]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, LabelFilter>",
    into = "BTreeMap<String, LabelFilter>"
)]
pub struct TrainedLabel {
    pub label: String,
    pub filter: LabelFilter,
}

impl TryFrom<BTreeMap<String, LabelFilter>> for TrainedLabel {
    type Error = String;

    fn try_from(map: BTreeMap<String, LabelFilter>) -> std::result::Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!(
                "trained_label must hold exactly one label, found {}",
                map.len()
            ));
        }
        let (label, filter) = map
            .into_iter()
            .next()
            .ok_or_else(|| "trained_label is empty".to_string())?;
        Ok(Self { label, filter })
    }
}

impl From<TrainedLabel> for BTreeMap<String, LabelFilter> {
    fn from(trained: TrainedLabel) -> Self {
        BTreeMap::from([(trained.label, trained.filter)])
    }
}

// ---------------------------------------------------------------------------
// Metadata sidecar
// ---------------------------------------------------------------------------

/// Contents of `parameters.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleMetadata {
    pub algorithm: Algorithm,
    pub encoding: Encoding,
    pub model_params: ModelParams,
    pub trained_label: TrainedLabel,
    pub trained_texts: TrainingRecord,
    pub vectorizer_params: VectorizerParams,
    pub normalized: bool,
}

/// `model_params` can only be typed once `algorithm` is known.
#[derive(Deserialize)]
struct RawMetadata {
    algorithm: Algorithm,
    encoding: Encoding,
    model_params: Value,
    trained_label: TrainedLabel,
    trained_texts: TrainingRecord,
    vectorizer_params: VectorizerParams,
    #[serde(default)]
    normalized: bool,
}

impl BundleMetadata {
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawMetadata = serde_json::from_str(text)
            .map_err(|err| ClassifierError::CorruptedParameters(err.to_string()))?;
        Ok(Self {
            algorithm: raw.algorithm,
            encoding: raw.encoding,
            model_params: ModelParams::from_value(raw.algorithm, raw.model_params)?,
            trained_label: raw.trained_label,
            trained_texts: raw.trained_texts,
            vectorizer_params: raw.vectorizer_params,
            normalized: raw.normalized,
        })
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ArtifactRef<'a> {
    estimator: &'a Estimator,
    vectorizer: &'a TfidfVectorizer,
}

#[derive(Deserialize)]
struct Artifact {
    estimator: Estimator,
    vectorizer: TfidfVectorizer,
}

/// A fitted estimator, the vectorizer its features came from, and the
/// metadata needed to reproduce and decode its predictions.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub estimator: Estimator,
    pub vectorizer: TfidfVectorizer,
    pub metadata: BundleMetadata,
}

impl ModelBundle {
    /// Write the bundle into a new directory under `root`, named after the
    /// algorithm, `timestamp` and hyperparameters. An existing directory of
    /// the same name is an error.
    pub fn save(&self, root: &Path, timestamp: DateTime<Local>) -> Result<PathBuf> {
        fs::create_dir_all(root)?;
        let name = bundle_dir_name(
            self.metadata.algorithm,
            &self.metadata.model_params,
            self.metadata.normalized,
            timestamp,
        );
        let dir = root.join(name);
        fs::create_dir(&dir)?;
        self.save_to(&dir)?;
        Ok(dir)
    }

    /// Write the artifact, then the sidecar, into an existing directory.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        log::info!("Saving {} model to {}", self.metadata.algorithm, dir.display());
        let file = File::create(dir.join(MODEL_FILE))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        bincode::serialize_into(
            &mut encoder,
            &ArtifactRef {
                estimator: &self.estimator,
                vectorizer: &self.vectorizer,
            },
        )?;
        encoder.finish()?.flush()?;

        log::info!("Saving parameters [encoding, model parameters, trained texts, trained label]");
        let json = serde_json::to_string_pretty(&self.metadata)?;
        fs::write(dir.join(PARAMETERS_FILE), json)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        for required in [MODEL_FILE, PARAMETERS_FILE] {
            if !dir.join(required).is_file() {
                return Err(ClassifierError::IncompleteBundle {
                    dir: dir.to_path_buf(),
                    missing: required,
                });
            }
        }

        let metadata = BundleMetadata::from_json(&fs::read_to_string(dir.join(PARAMETERS_FILE))?)?;
        let file = File::open(dir.join(MODEL_FILE))?;
        let artifact: Artifact = bincode::deserialize_from(GzDecoder::new(BufReader::new(file)))?;

        if artifact.estimator.algorithm() != metadata.algorithm {
            return Err(ClassifierError::CorruptedParameters(format!(
                "{} holds a {} model but its parameters name {}",
                dir.display(),
                artifact.estimator.algorithm(),
                metadata.algorithm
            )));
        }
        if artifact.estimator.params() != metadata.model_params {
            log::warn!(
                "model parameters in {} differ from the stored estimator; the estimator's are used",
                PARAMETERS_FILE
            );
        }
        log::debug!("Loaded {} model from {}", metadata.algorithm, dir.display());

        Ok(Self {
            estimator: artifact.estimator,
            vectorizer: artifact.vectorizer,
            metadata,
        })
    }
}

/// `asrs_classifier-<algorithm>-<YYYYmmdd_HHMMSS>-<signature>`, cut to
/// [`NAME_LIMIT`] characters including the `,norm` marker of normalized
/// training.
pub fn bundle_dir_name(
    algorithm: Algorithm,
    params: &ModelParams,
    normalized: bool,
    timestamp: DateTime<Local>,
) -> String {
    let full = format!(
        "{NAME_PREFIX}-{algorithm}-{}-{}",
        timestamp.format("%Y%m%d_%H%M%S"),
        params.signature()
    );
    let budget = if normalized {
        NAME_LIMIT - NORMALIZED_SUFFIX.len()
    } else {
        NAME_LIMIT
    };
    let mut name: String = full.chars().take(budget).collect();
    if normalized {
        name.push_str(NORMALIZED_SUFFIX);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::estimator::Classifier;
    use crate::features::tfidf::VectorizerParams;
    use ndarray::array;

    fn trained_bundle(normalized: bool) -> ModelBundle {
        let texts = vec![
            "altitude deviation climb".to_string(),
            "traffic conflict tcas".to_string(),
            "altitude bust climb".to_string(),
            "traffic on final conflict".to_string(),
        ];
        let mut vectorizer = TfidfVectorizer::new(VectorizerParams::default());
        let x = vectorizer.fit_transform(&texts).unwrap();

        let params = Algorithm::Mnb.default_params();
        let mut estimator = Estimator::from_params(&params);
        estimator.fit(x.view(), array![0, 1, 0, 1].view(), 2).unwrap();

        ModelBundle {
            estimator,
            vectorizer,
            metadata: BundleMetadata {
                algorithm: Algorithm::Mnb,
                encoding: [(0, "Deviation".to_string()), (1, "Conflict".to_string())]
                    .into_iter()
                    .collect(),
                model_params: params,
                trained_label: TrainedLabel {
                    label: "Events_Anomaly".into(),
                    filter: LabelFilter::new(["Deviation", "Conflict"]),
                },
                trained_texts: TrainingRecord::default().extended(&[PathBuf::from("a.csv")]),
                vectorizer_params: VectorizerParams::default(),
                normalized,
            },
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let bundle = trained_bundle(true);
        let dir = bundle.save(root.path(), Local::now()).unwrap();
        assert!(dir.file_name().unwrap().to_string_lossy().ends_with(",norm"));

        let loaded = ModelBundle::load(&dir).unwrap();
        assert_eq!(loaded.metadata, bundle.metadata);

        let probe = bundle.vectorizer.transform(&["climb altitude".to_string()]).unwrap();
        assert_eq!(
            loaded.estimator.predict_proba(probe.view()).unwrap(),
            bundle.estimator.predict_proba(probe.view()).unwrap()
        );
    }

    #[test]
    fn sidecar_layout() {
        let root = tempfile::tempdir().unwrap();
        let dir = trained_bundle(false).save(root.path(), Local::now()).unwrap();
        let json: Value =
            serde_json::from_str(&fs::read_to_string(dir.join(PARAMETERS_FILE)).unwrap()).unwrap();
        assert_eq!(json["algorithm"], "mnb");
        assert_eq!(json["encoding"]["1"], "Conflict");
        assert_eq!(json["model_params"]["alpha"], 1.0);
        assert_eq!(
            json["trained_label"]["Events_Anomaly"],
            serde_json::json!(["Conflict", "Deviation"])
        );
        assert_eq!(json["trained_texts"], serde_json::json!(["a.csv"]));
    }

    #[test]
    fn missing_sidecar_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let dir = trained_bundle(false).save(root.path(), Local::now()).unwrap();
        fs::remove_file(dir.join(PARAMETERS_FILE)).unwrap();
        assert!(matches!(
            ModelBundle::load(&dir),
            Err(ClassifierError::IncompleteBundle { missing: PARAMETERS_FILE, .. })
        ));
    }

    #[test]
    fn corrupted_parameters_are_reported() {
        let root = tempfile::tempdir().unwrap();
        let dir = trained_bundle(false).save(root.path(), Local::now()).unwrap();
        fs::write(dir.join(PARAMETERS_FILE), r#"{"algorithm": "mnb"}"#).unwrap();
        assert!(matches!(
            ModelBundle::load(&dir),
            Err(ClassifierError::CorruptedParameters(_))
        ));
    }

    #[test]
    fn duplicate_directory_fails() {
        let root = tempfile::tempdir().unwrap();
        let bundle = trained_bundle(false);
        let now = Local::now();
        bundle.save(root.path(), now).unwrap();
        assert!(matches!(
            bundle.save(root.path(), now),
            Err(ClassifierError::Io(_))
        ));
    }

    #[test]
    fn directory_names_stay_within_limit() {
        let now = Local::now();
        for algorithm in Algorithm::ALL {
            let grid = algorithm.search_grid(&algorithm.default_params()).unwrap();
            for params in &grid {
                for normalized in [false, true] {
                    let name = bundle_dir_name(algorithm, params, normalized, now);
                    assert!(name.chars().count() <= NAME_LIMIT, "{name}");
                    assert!(name.starts_with(&format!("asrs_classifier-{algorithm}-")));
                }
            }
        }
    }

    #[test]
    fn training_record_grows_without_mutation() {
        let first = TrainingRecord::default().extended(&[PathBuf::from("a.csv")]);
        let second = first.extended(&[PathBuf::from("b.csv")]);
        assert_eq!(first.paths(), &[PathBuf::from("a.csv")]);
        assert_eq!(second.paths(), &[PathBuf::from("a.csv"), PathBuf::from("b.csv")]);
    }

    #[test]
    fn trained_label_needs_one_entry() {
        let two: std::result::Result<TrainedLabel, _> =
            serde_json::from_str(r#"{"a": [], "b": []}"#);
        assert!(two.is_err());
    }
}
