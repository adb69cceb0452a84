use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// ReportTable – one parsed ASRS export
// ---------------------------------------------------------------------------

/// A parsed report export with its two header rows flattened into
/// `"<group>_<field>"` column names (e.g. `Report 1_Narrative`).
///
/// Rows are kept as raw strings; a short row reads as empty cells.
#[derive(Debug, Clone, Default)]
pub struct ReportTable {
    /// Flattened column names, in file order.
    pub column_names: Vec<String>,
    /// Data rows (header rows excluded).
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    /// Position of a column, if the export has it.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }

    /// All values of a column, one per row. Missing cells become `""`.
    pub fn column(&self, name: &str) -> Option<Vec<String>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).cloned().unwrap_or_default())
                .collect(),
        )
    }

    /// Number of reports.
    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

// ---------------------------------------------------------------------------
// Column extraction result
// ---------------------------------------------------------------------------

/// Values extracted per requested field name. Every requested field has an
/// entry, empty when no file provided the column.
pub type ColumnData = BTreeMap<String, Vec<String>>;

/// Which slice of rows to take from every file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineWindow {
    /// Index of the first row to keep.
    pub start: usize,
    /// Number of rows to keep; `None` keeps everything after `start`.
    pub count: Option<usize>,
}

impl LineWindow {
    /// Clamp the window to a file of `len` rows.
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        let start = self.start.min(len);
        let end = match self.count {
            Some(count) => start.saturating_add(count).min(len),
            None => len,
        };
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ReportTable {
        ReportTable {
            column_names: vec!["Events_Detector".into(), "Report 1_Narrative".into()],
            rows: vec![
                vec!["Person Flight Crew".into(), "We climbed.".into()],
                vec!["Automation Aircraft".into()],
                vec!["Person Flight Crew".into(), "".into()],
            ],
        }
    }

    #[test]
    fn short_rows_read_as_empty_cells() {
        let narratives = table().column("Report 1_Narrative").unwrap();
        assert_eq!(narratives, vec!["We climbed.", "", ""]);
    }

    #[test]
    fn missing_column_is_none() {
        let t = table();
        assert_eq!(t.len(), 3);
        assert!(t.column("Missing_Column").is_none());
    }

    #[test]
    fn window_is_clamped() {
        let window = LineWindow {
            start: 2,
            count: Some(10),
        };
        assert_eq!(window.bounds(5), (2, 5));
        assert_eq!(LineWindow::default().bounds(4), (0, 4));
        assert_eq!(window.bounds(1), (1, 1));
    }
}
