/// Data layer: report ingestion, column extraction and label filtering.
///
/// Architecture:
/// ```text
///  ASRS_*.csv (two header rows)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → ReportTable, extract named columns
///   └──────────┘
///        │
///        ▼
///   ┌────────────┐
///   │ ReportTable │  flattened "Group_Field" columns, raw cells
///   └────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  keep rows whose label passes the LabelFilter
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
