use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

/// Integer class id → human readable label.
///
/// Ids are dense and stable: extending an encoding never renumbers the
/// labels it already holds. In `parameters.json` the ids are JSON object keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding(BTreeMap<usize, String>);

impl Encoding {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.0.iter().map(|(id, label)| (*id, label.as_str()))
    }

    /// Reverse lookup of a label.
    pub fn id_of(&self, label: &str) -> Option<usize> {
        self.0
            .iter()
            .find(|(_, known)| known.as_str() == label)
            .map(|(id, _)| *id)
    }

    /// Append every unseen label, in sorted order, after the existing ids.
    pub fn extend_with<'a, I>(&mut self, labels: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut unseen: Vec<&str> = labels
            .into_iter()
            .filter(|label| self.id_of(label).is_none())
            .collect();
        unseen.sort_unstable();
        unseen.dedup();

        let mut next = self.0.keys().next_back().map_or(0, |last| last + 1);
        for label in unseen {
            self.0.insert(next, label.to_string());
            next += 1;
        }
    }

    /// Label of a predicted class id.
    pub fn decode(&self, id: usize) -> Result<&str> {
        if self.is_empty() {
            return Err(ClassifierError::EmptyEncoding);
        }
        self.0
            .get(&id)
            .map(String::as_str)
            .ok_or(ClassifierError::UnknownEncoding(id))
    }

    pub fn decode_all(&self, ids: &[usize]) -> Result<Vec<String>> {
        ids.iter()
            .map(|id| self.decode(*id).map(str::to_string))
            .collect()
    }
}

impl FromIterator<(usize, String)> for Encoding {
    fn from_iter<T: IntoIterator<Item = (usize, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
