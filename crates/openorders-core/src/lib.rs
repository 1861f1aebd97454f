//! # openorders-core
//!
//! Core domain model and shared plumbing for the openorders report pipeline.
//!
//! This crate provides:
//! - Domain types: `Table`, `RunContext`, `Segment`
//! - Configuration: `ReportConfig` and its sections (see [`config`])
//! - Notification: `Notifier`, `NotificationSink`, `SinkSession` (see [`notify`])
//!
//! ## Example
//!
//! ```rust
//! use openorders_core::Table;
//!
//! let mut table = Table::new(vec!["Order".into(), "Requested".into()]);
//! table.push_row(vec![Some("4711".into()), None]);
//! assert_eq!(table.len(), 1);
//! assert_eq!(table.column_index("Requested"), Some(1));
//! ```

pub mod config;
pub mod notify;

pub use config::{
    CategoryConfig, ConfigError, FilterConfig, MessageConfig, MissedPolicy, PathConfig,
    PathTemplate, ReportConfig, ScheduleConfig, SinkConfig, TriggerConfig, WorkbookConfig,
};
pub use notify::{
    Delivery, IgnoredFailure, MailRequest, NotificationSink, Notifier, SinkError, SinkSession,
};

use chrono::{NaiveDate, NaiveDateTime};

// ============================================================================
// Constants
// ============================================================================

/// Representation of date cells in the source extract
pub const SOURCE_DATE_FORMAT: &str = "%Y-%m-%d 00:00:00";

/// Representation of dates in the filtered table, file names and messages
pub const DISPLAY_DATE_FORMAT: &str = "%d.%m.%Y";

/// Organizational segment (sales organization) a report is produced for
pub type Segment = String;

// ============================================================================
// Run Context
// ============================================================================

/// The instant a trigger fired.
///
/// Captured once per firing and handed to every component of that run, so the
/// row filter, output file names and message bodies all agree on "today".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunContext {
    pub as_of: NaiveDateTime,
}

impl RunContext {
    pub fn new(as_of: NaiveDateTime) -> Self {
        Self { as_of }
    }

    /// Calendar date of the run
    pub fn today(&self) -> NaiveDate {
        self.as_of.date()
    }

    /// Run date as `DD.MM.YYYY`
    pub fn display_date(&self) -> String {
        self.as_of.format(DISPLAY_DATE_FORMAT).to_string()
    }
}

// ============================================================================
// Table
// ============================================================================

/// A text-typed table with named columns.
///
/// Cells are `None` when the source cell was blank or could not be coerced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// Create an empty table with the given header
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, padding or truncating it to the table width
    pub fn push_row(&mut self, mut row: Vec<Option<String>>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    /// Builder form of [`Table::push_row`]
    pub fn row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        self.push_row(cells.into_iter().map(|c| c.map(Into::into)).collect());
        self
    }

    /// Position of a column by header name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Number of data rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no data rows (a header alone is still empty)
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at (row, column)
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.as_deref())
    }

    /// All values of one column, top to bottom
    pub fn column_values(&self, col: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows
            .iter()
            .map(move |r| r.get(col).and_then(|c| c.as_deref()))
    }

    /// Names from `wanted` that are present in this table, in table order
    pub fn present_columns(&self, wanted: &[String]) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| wanted.contains(c))
            .cloned()
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
