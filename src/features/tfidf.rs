use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

/// Settings of the TF-IDF vectorizer; stored as `vectorizer_params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizerParams {
    /// Keep only the most frequent terms of the training corpus.
    pub max_features: usize,
    /// Shorter tokens are dropped.
    pub min_token_len: usize,
    pub lowercase: bool,
    /// Use `1 + ln(tf)` instead of raw term counts.
    pub sublinear_tf: bool,
}

impl Default for VectorizerParams {
    fn default() -> Self {
        Self {
            max_features: 2000,
            min_token_len: 2,
            lowercase: true,
            sublinear_tf: false,
        }
    }
}

/// Bag-of-words TF-IDF with smooth idf and L2-normalised rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    params: VectorizerParams,
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    pub fn new(params: VectorizerParams) -> Self {
        Self {
            params,
            vocabulary: BTreeMap::new(),
            idf: Vec::new(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.vocabulary.is_empty()
    }

    fn tokenize<'a>(&self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        let lowercase = self.params.lowercase;
        let min_len = self.params.min_token_len;
        text.split(|c: char| !c.is_alphanumeric())
            .filter(move |token| token.chars().count() >= min_len.max(1))
            .map(move |token| {
                if lowercase {
                    token.to_lowercase()
                } else {
                    token.to_string()
                }
            })
    }

    /// Learn the vocabulary and idf weights.
    ///
    /// With more distinct terms than `max_features`, the terms with the
    /// highest corpus counts are kept, alphabetical order breaking ties.
    pub fn fit(&mut self, documents: &[String]) -> Result<()> {
        if documents.is_empty() {
            return Err(ClassifierError::InvalidInput(
                "cannot fit a vectorizer on zero documents".into(),
            ));
        }

        let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for doc in documents {
            let mut seen: BTreeMap<String, usize> = BTreeMap::new();
            for token in self.tokenize(doc) {
                *seen.entry(token).or_default() += 1;
            }
            for (token, n) in seen {
                let entry = counts.entry(token).or_default();
                entry.0 += n;
                entry.1 += 1;
            }
        }
        if counts.is_empty() {
            return Err(ClassifierError::InvalidInput(
                "the training texts contain no terms".into(),
            ));
        }

        let mut ranked: Vec<(String, usize, usize)> = counts
            .into_iter()
            .map(|(term, (total, df))| (term, total, df))
            .collect();
        // stable: equal counts stay alphabetical
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(self.params.max_features.max(1));
        ranked.sort_by(|a, b| a.0.cmp(&b.0));

        let n_docs = documents.len() as f64;
        self.idf = ranked
            .iter()
            .map(|(_, _, df)| ((1.0 + n_docs) / (1.0 + *df as f64)).ln() + 1.0)
            .collect();
        self.vocabulary = ranked
            .into_iter()
            .enumerate()
            .map(|(idx, (term, _, _))| (term, idx))
            .collect();
        Ok(())
    }

    pub fn transform(&self, documents: &[String]) -> Result<Array2<f64>> {
        if !self.is_fitted() {
            return Err(ClassifierError::NotFitted("vectorizer"));
        }

        let mut matrix = Array2::<f64>::zeros((documents.len(), self.vocabulary.len()));
        for (row, doc) in documents.iter().enumerate() {
            for token in self.tokenize(doc) {
                if let Some(&col) = self.vocabulary.get(&token) {
                    matrix[[row, col]] += 1.0;
                }
            }
            let mut values = matrix.row_mut(row);
            for (col, value) in values.iter_mut().enumerate() {
                if *value > 0.0 {
                    let tf = if self.params.sublinear_tf {
                        1.0 + value.ln()
                    } else {
                        *value
                    };
                    *value = tf * self.idf[col];
                }
            }
            let norm = values.dot(&values).sqrt();
            if norm > 0.0 {
                values.mapv_inplace(|v| v / norm);
            }
        }
        Ok(matrix)
    }

    pub fn fit_transform(&mut self, documents: &[String]) -> Result<Array2<f64>> {
        self.fit(documents)?;
        self.transform(documents)
    }
}
