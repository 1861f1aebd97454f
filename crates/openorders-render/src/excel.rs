//! Open orders workbook writer
//!
//! The artifact is produced in two phases:
//!
//! 1. **Data**: the filtered table goes to a single sheet. Date columns get a
//!    `dd.mm.yyyy` column format and every non-blank date cell becomes a
//!    `=DATE(year, month, day)` formula, so the sheet sorts and filters on
//!    real dates.
//! 2. **Styling**: the sheet from phase 1 is read back from disk and written
//!    again with a frozen header, an auto-filter over the used range, the
//!    fills from [`crate::styling`] and padded column widths.
//!
//! Phase 2 only sees what phase 1 left on disk. Formula cells are therefore
//! matched and measured by their formula text (`=DATE(2026, 3, 2)`), not by
//! the displayed date.
//!
//! ## Example Output Structure
//!
//! ```text
//! Sheet: Sheet1 (header frozen, auto-filter on A1:D3)
//! | Order | Requested         | Delivery Block | Status  |
//! |-------|-------------------|----------------|---------|
//! | 4711  | =DATE(2026, 3, 2) |                | Blocked |   <- yellow
//! | 4712  |                   | ZB             | 01      |   <- red, red
//! ```
//!
//! The destination file is never left half-written: the final workbook is
//! saved to a temporary file in the destination directory and renamed over
//! the target.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Datelike, NaiveDate};
use openorders_core::{Table, WorkbookConfig, DISPLAY_DATE_FORMAT};
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet};
use tracing::debug;

use crate::styling::{column_widths, plan_fills, Fill, SheetGrid, SheetValue, StyleRules};
use crate::RenderError;

/// Number format of date columns
pub const DATE_NUM_FORMAT: &str = "dd.mm.yyyy";

// ============================================================================
// Formatter
// ============================================================================

/// Two-phase writer for the open orders workbook
#[derive(Clone, Debug)]
pub struct WorkbookFormatter {
    sheet_name: String,
    /// Columns holding `DD.MM.YYYY` dates
    date_columns: Vec<String>,
    rules: StyleRules,
    width_padding: usize,
}

impl Default for WorkbookFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkbookFormatter {
    /// Formatter with no date columns and no fill rules
    pub fn new() -> Self {
        Self {
            sheet_name: "Sheet1".into(),
            date_columns: Vec::new(),
            rules: StyleRules::default(),
            width_padding: 6,
        }
    }

    /// Formatter configured from the `[workbook]` section
    pub fn from_config(config: &WorkbookConfig, date_columns: &[String]) -> Self {
        Self::new()
            .sheet_name(&config.sheet_name)
            .date_columns(date_columns.to_vec())
            .rules(StyleRules::from_config(config))
            .width_padding(config.width_padding)
    }

    pub fn sheet_name(mut self, name: &str) -> Self {
        self.sheet_name = name.to_string();
        self
    }

    pub fn date_columns(mut self, columns: Vec<String>) -> Self {
        self.date_columns = columns;
        self
    }

    pub fn rules(mut self, rules: StyleRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn width_padding(mut self, padding: usize) -> Self {
        self.width_padding = padding;
        self
    }

    /// Write `table` to `dest` with both phases applied.
    ///
    /// Phase 1 goes to a staging file next to `dest`; `dest` itself is only
    /// touched by the final rename.
    pub fn persist(&self, table: &Table, dest: &Path) -> Result<(), RenderError> {
        let staging = tempfile::Builder::new()
            .prefix(".openorders-")
            .suffix(".xlsx")
            .tempfile_in(parent_dir(dest))?;

        self.write_data(table, staging.path())?;
        let grid = read_sheet(staging.path())?;
        let buffer = self.styled_buffer(&grid)?;
        write_atomic(dest, &buffer)?;

        debug!(
            "Wrote {} rows x {} columns to {}",
            table.len(),
            table.columns.len(),
            dest.display()
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Phase 1
    // ------------------------------------------------------------------------

    /// Phase 1: data with date formulas
    pub fn write_data(&self, table: &Table, path: &Path) -> Result<(), RenderError> {
        let buffer = self.data_buffer(table)?;
        std::fs::write(path, buffer)?;
        Ok(())
    }

    fn data_buffer(&self, table: &Table) -> Result<Vec<u8>, RenderError> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(&self.sheet_name)?;

        let header = header_format();
        let date_format = Format::new().set_num_format(DATE_NUM_FORMAT);
        let date_cols = self.date_column_set(&table.columns);

        for (col, name) in table.columns.iter().enumerate() {
            let col = col as u16;
            sheet.write_string_with_format(0, col, name, &header)?;
            if date_cols.contains(&(col as usize)) {
                sheet.set_column_format(col, &date_format)?;
            }
        }

        for (row_idx, row) in table.rows.iter().enumerate() {
            let row_num = row_idx as u32 + 1;
            for (col_idx, cell) in row.iter().enumerate() {
                let Some(value) = cell.as_deref() else {
                    continue;
                };
                let col = col_idx as u16;
                if date_cols.contains(&col_idx) {
                    let formula = date_formula(&table.columns[col_idx], value)?;
                    sheet.write_formula_with_format(row_num, col, formula.as_str(), &date_format)?;
                } else {
                    sheet.write_string(row_num, col, value)?;
                }
            }
        }

        Ok(workbook.save_to_buffer()?)
    }

    // ------------------------------------------------------------------------
    // Phase 2
    // ------------------------------------------------------------------------

    /// Phase 2: restyle an existing artifact in place
    pub fn apply_styling(&self, path: &Path) -> Result<(), RenderError> {
        let grid = read_sheet(path)?;
        let buffer = self.styled_buffer(&grid)?;
        write_atomic(path, &buffer)
    }

    fn styled_buffer(&self, grid: &SheetGrid) -> Result<Vec<u8>, RenderError> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(&self.sheet_name)?;

        let header: Vec<String> = grid.header().into_iter().map(String::from).collect();
        let date_cols = self.date_column_set(&header);
        let fills = plan_fills(grid, &self.rules);

        let header_format = header_format();
        let date_format = Format::new().set_num_format(DATE_NUM_FORMAT);
        for &col in &date_cols {
            sheet.set_column_format(col as u16, &date_format)?;
        }

        for (row_idx, row) in grid.rows.iter().enumerate() {
            for (col_idx, cell) in row.iter().enumerate() {
                let mut format = if row_idx == 0 {
                    header_format.clone()
                } else if date_cols.contains(&col_idx) {
                    date_format.clone()
                } else {
                    Format::new()
                };
                if let Some(fill) = fills[row_idx][col_idx] {
                    format = format.set_background_color(fill.rgb());
                }
                write_cell(sheet, row_idx as u32, col_idx as u16, cell.as_ref(), &format)?;
            }
        }

        if grid.height() > 0 && grid.width() > 0 {
            sheet.set_freeze_panes(1, 0)?;
            sheet.autofilter(0, 0, grid.height() as u32 - 1, grid.width() as u16 - 1)?;
        }

        for (col, width) in column_widths(grid, self.width_padding).into_iter().enumerate() {
            sheet.set_column_width(col as u16, width as f64)?;
        }

        let flagged = fills.iter().flatten().filter(|f| **f == Some(Fill::Flag)).count();
        let highlighted = fills.iter().flatten().filter(|f| **f == Some(Fill::Highlight)).count();
        debug!("Styled sheet: {flagged} flagged, {highlighted} highlighted cells");

        Ok(workbook.save_to_buffer()?)
    }

    fn date_column_set(&self, header: &[String]) -> HashSet<usize> {
        header
            .iter()
            .enumerate()
            .filter(|(_, name)| self.date_columns.contains(name))
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// Header style of a pandas-style export: bold, thin border, centered
fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_border(FormatBorder::Thin)
        .set_align(FormatAlign::Center)
}

/// Write one cell, blank cells keep their fill
fn write_cell(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: Option<&SheetValue>,
    format: &Format,
) -> Result<(), RenderError> {
    match value {
        Some(SheetValue::Text(s)) => {
            sheet.write_string_with_format(row, col, s, format)?;
        }
        Some(SheetValue::Formula(f)) => {
            sheet.write_formula_with_format(row, col, f.as_str(), format)?;
        }
        Some(SheetValue::Number(n)) => {
            sheet.write_number_with_format(row, col, *n, format)?;
        }
        Some(SheetValue::Bool(b)) => {
            sheet.write_boolean_with_format(row, col, *b, format)?;
        }
        None => {}
    }
    Ok(())
}

/// `=DATE(y, m, d)` for a `DD.MM.YYYY` cell
fn date_formula(column: &str, value: &str) -> Result<String, RenderError> {
    let date = NaiveDate::parse_from_str(value, DISPLAY_DATE_FORMAT).map_err(|_| {
        RenderError::InvalidDate {
            column: column.to_string(),
            value: value.to_string(),
        }
    })?;
    Ok(format!("=DATE({}, {}, {})", date.year(), date.month(), date.day()))
}

// ============================================================================
// Reading back
// ============================================================================

/// Read the first sheet of a workbook into a grid anchored at A1.
///
/// Formula cells come back as their formula text with a leading `=`; the
/// cached value is ignored.
pub fn read_sheet(path: &Path) -> Result<SheetGrid, RenderError> {
    let read_err = |detail: String| RenderError::Read {
        path: path.to_path_buf(),
        detail,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| read_err(e.to_string()))?;
    let name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| read_err("workbook has no worksheets".into()))?;

    let values = workbook
        .worksheet_range(&name)
        .map_err(|e| read_err(e.to_string()))?;
    let formulas = workbook
        .worksheet_formula(&name)
        .map_err(|e| read_err(e.to_string()))?;

    let (height, width) = [extent(&values), extent(&formulas)]
        .into_iter()
        .fold((0, 0), |(h, w), (eh, ew)| (h.max(eh), w.max(ew)));
    let mut rows: Vec<Vec<Option<SheetValue>>> = vec![vec![None; width]; height];

    if let Some((r0, c0)) = values.start() {
        for (r, c, data) in values.used_cells() {
            rows[r0 as usize + r][c0 as usize + c] = sheet_value(data);
        }
    }
    if let Some((r0, c0)) = formulas.start() {
        for (r, c, formula) in formulas.used_cells() {
            if !formula.is_empty() {
                rows[r0 as usize + r][c0 as usize + c] = Some(SheetValue::Formula(format!("={formula}")));
            }
        }
    }

    Ok(SheetGrid::new(rows))
}

/// Rows and columns needed to hold `range` when anchored at A1
fn extent<T>(range: &Range<T>) -> (usize, usize)
where
    T: calamine::CellType,
{
    match range.end() {
        Some((r, c)) if !range.is_empty() => (r as usize + 1, c as usize + 1),
        _ => (0, 0),
    }
}

fn sheet_value(data: &Data) -> Option<SheetValue> {
    match data {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(SheetValue::Text(s.clone())),
        Data::Float(f) => Some(SheetValue::Number(*f)),
        Data::Int(i) => Some(SheetValue::Number(*i as f64)),
        Data::Bool(b) => Some(SheetValue::Bool(*b)),
        Data::DateTime(dt) => Some(SheetValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(SheetValue::Text(s.clone())),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Spreadsheet column letter for a zero-based column index (0 = A, 26 = AA)
pub fn column_letter(col: u16) -> String {
    let mut result = String::new();
    let mut n = col as u32;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Replace `dest` with `bytes` via a temporary file in the same directory
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), RenderError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".openorders-")
        .suffix(".tmp")
        .tempfile_in(parent_dir(dest))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| RenderError::Io(e.error))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
