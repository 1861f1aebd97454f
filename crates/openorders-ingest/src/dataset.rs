//! Source extract loading and calendar filtering
//!
//! The extract is read as text. Configured date columns are coerced with the
//! fixed source representation `YYYY-MM-DD 00:00:00` (anything else becomes
//! null), the designated column drives the row filter, and every coerced
//! column is written back as `DD.MM.YYYY`.

use std::path::Path;

use chrono::{Datelike, NaiveDate};
use openorders_core::{FilterConfig, RunContext, Table, DISPLAY_DATE_FORMAT, SOURCE_DATE_FORMAT};
use tracing::debug;

use crate::{cell_text, read_first_sheet, IngestError};

/// Load the first worksheet of an extract as a text table.
///
/// The first row is the header. Header cells without text are named
/// `Unnamed: <index>`.
pub fn load_extract(path: &Path) -> Result<Table, IngestError> {
    let range = read_first_sheet(path)?;
    let mut rows = range.rows();

    let Some(header) = rows.next() else {
        return Ok(Table::default());
    };

    let columns = header
        .iter()
        .enumerate()
        .map(|(idx, cell)| cell_text(cell).unwrap_or_else(|| format!("Unnamed: {idx}")))
        .collect();
    let mut table = Table::new(columns);

    for row in rows {
        table.push_row(row.iter().map(cell_text).collect());
    }

    debug!(
        "Loaded {} rows x {} columns from {}",
        table.len(),
        table.columns.len(),
        path.display()
    );
    Ok(table)
}

/// Parse a source date cell; anything not in the source representation is null
pub fn parse_source_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, SOURCE_DATE_FORMAT).ok()
}

/// A filtered table ready for the workbook formatter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilteredTable {
    pub table: Table,
    /// Date columns present in the table, in table order
    pub date_columns: Vec<String>,
}

/// Calendar filter over one designated date column
#[derive(Clone, Debug)]
pub struct DatasetFilter<'a> {
    config: &'a FilterConfig,
}

impl<'a> DatasetFilter<'a> {
    pub fn new(config: &'a FilterConfig) -> Self {
        Self { config }
    }

    /// Load an extract and filter it
    pub fn run(&self, path: &Path, ctx: &RunContext) -> Result<FilteredTable, IngestError> {
        let table = load_extract(path)?;
        self.apply(table, ctx)
    }

    /// True when rows are filtered on this run date
    pub fn is_active(&self, ctx: &RunContext) -> bool {
        ctx.today().day() < self.config.day_threshold
    }

    /// Coerce date columns, drop rows dated today or later (before the
    /// threshold day only) and reformat dates for display.
    pub fn apply(&self, table: Table, ctx: &RunContext) -> Result<FilteredTable, IngestError> {
        let date_columns = table.present_columns(&self.config.date_columns);
        let date_idx: Vec<usize> = date_columns
            .iter()
            .filter_map(|c| table.column_index(c))
            .collect();

        let today = ctx.today();
        let active = self.is_active(ctx);
        let designated = if active {
            let idx = table
                .column_index(&self.config.designated_column)
                .ok_or_else(|| IngestError::MissingColumn(self.config.designated_column.clone()))?;
            Some(idx)
        } else {
            None
        };

        let Table { columns, rows } = table;
        let before = rows.len();
        let mut filtered = Table::new(columns);

        for row in rows {
            let keep = match designated {
                Some(idx) => match row[idx].as_deref().and_then(parse_source_date) {
                    None => true,
                    Some(date) => date < today,
                },
                None => true,
            };
            if !keep {
                continue;
            }

            let row = row
                .into_iter()
                .enumerate()
                .map(|(idx, cell)| {
                    if date_idx.contains(&idx) {
                        cell.as_deref()
                            .and_then(parse_source_date)
                            .map(|d| d.format(DISPLAY_DATE_FORMAT).to_string())
                    } else {
                        cell
                    }
                })
                .collect();
            filtered.push_row(row);
        }

        debug!(
            "Filter {} on '{}': kept {} of {} rows",
            if active { "active" } else { "inactive" },
            self.config.designated_column,
            filtered.len(),
            before
        );

        Ok(FilteredTable {
            table: filtered,
            date_columns,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
