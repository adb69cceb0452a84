use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Label filter: which values of the trained column are kept
// ---------------------------------------------------------------------------

/// Allowed values of a label column. An empty filter allows every value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelFilter(BTreeSet<String>);

impl LabelFilter {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    /// Whether the filter places no restriction.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether a single (already split) label value passes.
    pub fn allows(&self, value: &str) -> bool {
        self.0.is_empty() || self.0.contains(value)
    }

    /// Pick the label of a raw cell.
    ///
    /// ASRS cells may list several values separated by `;`. The first value
    /// the filter allows is used; blank cells yield `None`.
    pub fn select<'a>(&self, cell: &'a str) -> Option<&'a str> {
        cell.split(';')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .find(|value| self.allows(value))
    }
}

/// Return `(row index, label)` for every row whose cell passes the filter.
pub fn filtered_labels<'a>(cells: &'a [String], filter: &LabelFilter) -> Vec<(usize, &'a str)> {
    cells
        .iter()
        .enumerate()
        .filter_map(|(idx, cell)| filter.select(cell).map(|label| (idx, label)))
        .collect()
}
