//! Cell fill and column width rules
//!
//! Everything here works on an in-memory [`SheetGrid`] so the rules can be
//! tested without touching a workbook.
//!
//! ## Fill priority
//!
//! For each cell, first match wins:
//!
//! | Check | Fill |
//! |-------|------|
//! | value is a highlight value | yellow |
//! | column is "not-blank" and the cell has a value | red |
//! | column is "flag-values" and the value is listed | red |
//!
//! Categories are tried in configured order. The header row is scanned like
//! any other row.

use std::collections::{BTreeMap, HashSet};

use openorders_core::{CategoryConfig, WorkbookConfig};

use crate::excel::column_letter;

// ============================================================================
// Grid
// ============================================================================

/// Value of a populated cell
#[derive(Clone, Debug, PartialEq)]
pub enum SheetValue {
    Text(String),
    /// Formula source including the leading `=`
    Formula(String),
    Number(f64),
    Bool(bool),
}

impl SheetValue {
    /// Text as it is matched and measured; numbers and booleans have none
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SheetValue::Text(s) | SheetValue::Formula(s) => Some(s),
            SheetValue::Number(_) | SheetValue::Bool(_) => None,
        }
    }
}

/// Rectangular sheet contents, row 0 being the header
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SheetGrid {
    pub rows: Vec<Vec<Option<SheetValue>>>,
}

impl SheetGrid {
    pub fn new(rows: Vec<Vec<Option<SheetValue>>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, None);
                r
            })
            .collect();
        Self { rows }
    }

    pub fn width(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&SheetValue> {
        self.rows.get(row).and_then(|r| r.get(col)).and_then(Option::as_ref)
    }

    /// Header texts (empty string for non-text header cells)
    pub fn header(&self) -> Vec<&str> {
        (0..self.width())
            .map(|col| self.get(0, col).and_then(SheetValue::as_text).unwrap_or(""))
            .collect()
    }
}

// ============================================================================
// Rules
// ============================================================================

/// Background applied to a cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fill {
    /// Yellow, for highlight values
    Highlight,
    /// Red, for values a category flags
    Flag,
}

impl Fill {
    pub fn rgb(self) -> u32 {
        match self {
            Fill::Highlight => 0xFFFF00,
            Fill::Flag => 0xFF4D4D,
        }
    }
}

/// Highlight list plus column categories in priority order
#[derive(Clone, Debug, Default)]
pub struct StyleRules {
    pub highlight_values: HashSet<String>,
    pub categories: Vec<CategoryConfig>,
}

impl StyleRules {
    pub fn from_config(config: &WorkbookConfig) -> Self {
        Self {
            highlight_values: config.highlight_values.iter().cloned().collect(),
            categories: config.categories.clone(),
        }
    }

    /// Fill for one cell whose column belongs to `column_categories`
    /// (indices into `self.categories`, ascending)
    pub fn classify(&self, value: Option<&SheetValue>, column_categories: &[usize]) -> Option<Fill> {
        let text = value.and_then(SheetValue::as_text);

        if text.is_some_and(|t| self.highlight_values.contains(t)) {
            return Some(Fill::Highlight);
        }

        column_categories
            .iter()
            .filter_map(|&idx| self.categories.get(idx))
            .find_map(|category| match category {
                CategoryConfig::NotBlank { .. } => value.map(|_| Fill::Flag),
                CategoryConfig::FlagValues { values, .. } => text
                    .filter(|t| values.iter().any(|v| v == t))
                    .map(|_| Fill::Flag),
            })
    }
}

/// Column letters resolved to the categories they belong to
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategoryIndex {
    by_letter: BTreeMap<String, Vec<usize>>,
}

impl CategoryIndex {
    /// Scan the header row once and record, per column letter, every category
    /// naming that header
    pub fn resolve(header: &[&str], categories: &[CategoryConfig]) -> Self {
        let mut by_letter: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (col, name) in header.iter().enumerate() {
            let letter = column_letter(col as u16);
            for (idx, category) in categories.iter().enumerate() {
                if category.columns().iter().any(|c| c == name) {
                    by_letter.entry(letter.clone()).or_default().push(idx);
                }
            }
        }
        Self { by_letter }
    }

    pub fn categories_for(&self, letter: &str) -> &[usize] {
        self.by_letter.get(letter).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Fill decision for every cell of the grid
pub fn plan_fills(grid: &SheetGrid, rules: &StyleRules) -> Vec<Vec<Option<Fill>>> {
    let index = CategoryIndex::resolve(&grid.header(), &rules.categories);
    let letters: Vec<String> = (0..grid.width()).map(|c| column_letter(c as u16)).collect();

    grid.rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(col, value)| rules.classify(value.as_ref(), index.categories_for(&letters[col])))
                .collect()
        })
        .collect()
}

/// Column widths: longest text value (in characters) plus `padding`.
///
/// Blank, numeric and boolean cells do not count.
pub fn column_widths(grid: &SheetGrid, padding: usize) -> Vec<usize> {
    (0..grid.width())
        .map(|col| {
            let longest = grid
                .rows
                .iter()
                .filter_map(|row| row[col].as_ref().and_then(SheetValue::as_text))
                .map(|t| t.chars().count())
                .max()
                .unwrap_or(0);
            longest + padding
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
