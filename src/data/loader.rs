use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use csv::StringRecord;

use super::model::{ColumnData, LineWindow, ReportTable};

/// How many directories (the working directory included) are searched for a
/// relative input path.
pub const MAX_LOOKUP_DEPTH: usize = 5;

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load an ASRS export: two header rows, then one report per line.
///
/// The header rows are flattened as `"<row 1>_<row 2>"`. ASRS only names a
/// group once, so a blank cell in the first row inherits the group to its
/// left. Blank lines are skipped.
pub fn load_report_table(path: &Path) -> Result<ReportTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening CSV {}", path.display()))?;

    let mut records = reader.records();
    let top = match records.next() {
        Some(record) => record.context("reading first header row")?,
        None => bail!("{} is empty", path.display()),
    };
    let bottom = match records.next() {
        Some(record) => record.context("reading second header row")?,
        None => bail!("{} has a single header row", path.display()),
    };
    let column_names = flatten_headers(&top, &bottom);

    let mut rows = Vec::new();
    for (row_no, result) in records.enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(|cell| cell.to_string()).collect());
    }

    Ok(ReportTable { column_names, rows })
}

/// Extract the given columns from every file, concatenating the rows in file
/// order.
///
/// Files that cannot be located and columns a file lacks are reported to
/// standard error and skipped; the run continues.
pub fn extract_columns(
    paths: &[PathBuf],
    field_names: &[&str],
    window: LineWindow,
) -> Result<ColumnData> {
    let mut data: ColumnData = field_names
        .iter()
        .map(|name| (name.to_string(), Vec::new()))
        .collect();

    for path in paths {
        let Some(resolved) = locate_file(path, MAX_LOOKUP_DEPTH) else {
            log::error!(
                "The file given by \"{}\" was not found in the searched directories.",
                path.display()
            );
            continue;
        };

        let table = load_report_table(&resolved)?;
        let (start, end) = window.bounds(table.len());

        for name in field_names {
            match table.column(name) {
                Some(values) => {
                    if let Some(out) = data.get_mut(*name) {
                        out.extend(values.into_iter().skip(start).take(end - start));
                    }
                }
                None => log::error!(
                    "\"{name}\" is not a field of {}. Column names have the format \
                     \"FirstLineTitle_SecondLineTitle\".",
                    resolved.display()
                ),
            }
        }
    }

    Ok(data)
}

/// Resolve `path` against the working directory and its ancestors, at most
/// `max_depth` directories deep. Absolute paths are only checked for
/// existence.
pub fn locate_file(path: &Path, max_depth: usize) -> Option<PathBuf> {
    if path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }

    let mut dir = std::env::current_dir().ok()?;
    for _ in 0..max_depth {
        let candidate = dir.join(path);
        if candidate.exists() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(parent) if parent != dir => dir = parent.to_path_buf(),
            _ => break,
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Header helpers
// ---------------------------------------------------------------------------

/// Join the two header rows column by column with `_`, carrying the last
/// non-blank group name over blank first-row cells.
pub fn flatten_headers(top: &StringRecord, bottom: &StringRecord) -> Vec<String> {
    let width = top.len().max(bottom.len());
    let mut group = String::new();
    (0..width)
        .map(|idx| {
            let top_cell = top.get(idx).unwrap_or("").trim();
            if !top_cell.is_empty() {
                group = top_cell.to_string();
            }
            let field = bottom.get(idx).unwrap_or("").trim();
            format!("{group}_{field}")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = "\
,Events,Report 1,,Report 2,
ACN,Detector,Narrative,Callback,Narrative,Callback
1,Person Flight Crew,Climbed early,,,
,,,,,
2,Automation Aircraft,TCAS alert,Call done,Second view,
";

    #[test]
    fn headers_are_flattened_with_forward_fill() {
        let top = StringRecord::from(vec!["", "Report 1", "", "Report 2"]);
        let bottom = StringRecord::from(vec!["ACN", "Narrative", "Callback", "Narrative"]);
        assert_eq!(
            flatten_headers(&top, &bottom),
            vec!["_ACN", "Report 1_Narrative", "Report 1_Callback", "Report 2_Narrative"]
        );
    }

    #[test]
    fn loads_table_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.csv");
        fs::write(&path, SAMPLE).unwrap();

        let table = load_report_table(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.column("Report 1_Callback").unwrap(),
            vec!["".to_string(), "Call done".to_string()]
        );
        assert_eq!(
            table.column("Events_Detector").unwrap()[1],
            "Automation Aircraft"
        );
    }

    #[test]
    fn missing_files_and_columns_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.csv");
        fs::write(&path, SAMPLE).unwrap();
        let missing = dir.path().join("nope.csv");

        let data = extract_columns(
            &[missing, path.clone(), path],
            &["Report 1_Narrative", "Time_Date"],
            LineWindow::default(),
        )
        .unwrap();

        assert_eq!(data["Report 1_Narrative"].len(), 4);
        assert!(data["Time_Date"].is_empty());
    }

    #[test]
    fn window_limits_rows_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.csv");
        fs::write(&path, SAMPLE).unwrap();

        let window = LineWindow {
            start: 1,
            count: Some(1),
        };
        let data = extract_columns(&[path], &["Report 1_Narrative"], window).unwrap();
        assert_eq!(data["Report 1_Narrative"], vec!["TCAS alert".to_string()]);
    }

    #[test]
    fn single_header_row_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        fs::write(&path, "A,B\n").unwrap();
        assert!(load_report_table(&path).is_err());
    }
}
