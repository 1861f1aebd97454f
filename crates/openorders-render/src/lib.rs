//! # openorders-render
//!
//! Output side of the report pipeline: the styled open orders workbook.
//!
//! This crate provides:
//! - [`excel`]: the two-phase workbook formatter (data with date formulas,
//!   then styling of the artifact on disk) with atomic replacement
//! - [`styling`]: the pure cell-fill and column-width rules
//!
//! ## Example
//!
//! ```rust,ignore
//! use openorders_render::WorkbookFormatter;
//!
//! let formatter = WorkbookFormatter::from_config(&config.workbook, &config.filter.date_columns);
//! formatter.persist(&filtered.table, &output_path)?;
//! ```

pub mod excel;
pub mod styling;

pub use excel::{column_letter, read_sheet, WorkbookFormatter};
pub use styling::{CategoryIndex, Fill, SheetGrid, SheetValue, StyleRules};

use std::path::PathBuf;

use thiserror::Error;

/// Rendering error
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(#[from] rust_xlsxwriter::XlsxError),

    #[error("Cannot read back {}: {detail}", .path.display())]
    Read { path: PathBuf, detail: String },

    #[error("Invalid date '{value}' in column '{column}'")]
    InvalidDate { column: String, value: String },
}
