//! # openorders-ingest
//!
//! Input side of the report pipeline.
//!
//! This crate provides:
//! - [`dataset`]: loading the source extract as a text table and applying the
//!   calendar filter on the designated date column
//! - [`recipients`]: turning the two recipient list workbooks into
//!   `"; "`-joined address strings
//!
//! ## Example
//!
//! ```rust,ignore
//! use openorders_ingest::{dataset::DatasetFilter, recipients::resolve_recipients};
//!
//! let filtered = DatasetFilter::new(&config.filter).run(&extract_path, &ctx)?;
//! let recipients = resolve_recipients(&to_path, &cc_path)?;
//! ```

pub mod dataset;
pub mod recipients;

pub use dataset::{load_extract, DatasetFilter, FilteredTable};
pub use recipients::{join_addresses, resolve_recipients, Recipients};

use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Ingestion error
#[derive(Debug, Error)]
pub enum IngestError {
    /// An expected input file does not exist
    #[error("Path: {} was not found.", .0.display())]
    MissingFile(PathBuf),

    #[error("Cannot read workbook {}: {detail}", .path.display())]
    Workbook { path: PathBuf, detail: String },

    #[error("Workbook {} contains no worksheet", .0.display())]
    NoWorksheet(PathBuf),

    #[error("Column '{0}' not found in dataset")]
    MissingColumn(String),
}

// ============================================================================
// Workbook Access
// ============================================================================

/// Read the first worksheet of a workbook.
///
/// Existence is checked up front so a missing file is reported as
/// [`IngestError::MissingFile`] rather than an opaque open error.
pub(crate) fn read_first_sheet(path: &Path) -> Result<Range<Data>, IngestError> {
    if !path.exists() {
        return Err(IngestError::MissingFile(path.to_path_buf()));
    }

    let mut workbook = open_workbook_auto(path).map_err(|e| IngestError::Workbook {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    workbook
        .worksheet_range_at(0)
        .ok_or_else(|| IngestError::NoWorksheet(path.to_path_buf()))?
        .map_err(|e| IngestError::Workbook {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

/// Text form of a cell, as a string-typed spreadsheet load would produce it.
///
/// Blank and error cells are `None`. Whole floats lose their fraction and
/// spreadsheet dates become `YYYY-MM-DD HH:MM:SS`.
pub fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(s.clone()),
        Data::Int(n) => Some(n.to_string()),
        Data::Float(f) => Some(float_text(*f)),
        Data::Bool(true) => Some("True".into()),
        Data::Bool(false) => Some("False".into()),
        Data::DateTime(dt) => {
            excel_serial_to_datetime(dt.as_f64()).map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        Data::DateTimeIso(s) => Some(iso_text(s)),
        Data::DurationIso(s) => Some(s.clone()),
    }
}

fn float_text(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

fn iso_text(s: &str) -> String {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return dt.format("%Y-%m-%d %H:%M:%S").to_string();
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return format!("{} 00:00:00", d.format("%Y-%m-%d"));
    }
    s.to_string()
}

/// Convert a spreadsheet serial date (days since 1899-12-30) to a timestamp
pub fn excel_serial_to_datetime(value: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = value.floor() as i64;
    let seconds = (value.fract() * 86_400.0).round() as i64;
    epoch
        .checked_add_signed(chrono::Duration::days(days))?
        .checked_add_signed(chrono::Duration::seconds(seconds))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn blank_and_error_cells_are_null() {
        assert_eq!(cell_text(&Data::Empty), None);
        assert_eq!(cell_text(&Data::String(String::new())), None);
        assert_eq!(
            cell_text(&Data::Error(calamine::CellErrorType::NA)),
            None
        );
    }

    #[test]
    fn whole_floats_lose_fraction() {
        assert_eq!(cell_text(&Data::Float(1500.0)).as_deref(), Some("1500"));
        assert_eq!(cell_text(&Data::Float(2.5)).as_deref(), Some("2.5"));
        assert_eq!(cell_text(&Data::Int(42)).as_deref(), Some("42"));
    }

    #[test]
    fn bools_use_capitalized_words() {
        assert_eq!(cell_text(&Data::Bool(true)).as_deref(), Some("True"));
    }

    #[test]
    fn iso_dates_get_source_representation() {
        assert_eq!(
            cell_text(&Data::DateTimeIso("2026-01-05T00:00:00".into())).as_deref(),
            Some("2026-01-05 00:00:00")
        );
        assert_eq!(
            cell_text(&Data::DateTimeIso("2026-01-05".into())).as_deref(),
            Some("2026-01-05 00:00:00")
        );
    }

    #[test]
    fn serial_date_conversion() {
        // 45292 = 2024-01-01
        let dt = excel_serial_to_datetime(45292.0).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-01 00:00:00");
        let noon = excel_serial_to_datetime(45292.5).unwrap();
        assert_eq!(noon.format("%H:%M").to_string(), "12:00");
    }

    #[test]
    fn missing_file_is_reported_as_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.xlsx");
        let err = read_first_sheet(&path).unwrap_err();
        assert!(matches!(err, IngestError::MissingFile(p) if p == path));
    }
}
