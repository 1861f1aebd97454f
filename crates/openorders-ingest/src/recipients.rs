//! Recipient list resolution
//!
//! Each list is a workbook whose first column holds one address per row under
//! a header. Cells that are not text (blank cells, numbers left over from
//! copy-paste) are skipped.

use std::path::Path;

use calamine::Data;
use tracing::error;

use crate::{read_first_sheet, IngestError};

/// Separator between joined addresses
pub const ADDRESS_SEPARATOR: &str = "; ";

/// Primary and copy recipients of one segment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recipients {
    pub to: String,
    pub cc: String,
}

/// Resolve both recipient lists.
///
/// The primary list is checked first; when it is missing the copy list is
/// not looked at.
pub fn resolve_recipients(primary: &Path, copy: &Path) -> Result<Recipients, IngestError> {
    for path in [primary, copy] {
        if !path.exists() {
            error!("Path to {} was not found.", path.display());
            return Err(IngestError::MissingFile(path.to_path_buf()));
        }
    }

    Ok(Recipients {
        to: read_address_list(primary)?,
        cc: read_address_list(copy)?,
    })
}

/// Read one list file and join its addresses
pub fn read_address_list(path: &Path) -> Result<String, IngestError> {
    let range = read_first_sheet(path)?;
    let first_column: Vec<Data> = range
        .rows()
        .skip(1)
        .map(|row| row.first().cloned().unwrap_or(Data::Empty))
        .collect();
    Ok(join_addresses(&first_column))
}

/// Join the text cells with `"; "`, in order, without a trailing separator.
///
/// Text is taken verbatim; an empty or whitespace-only string still counts.
pub fn join_addresses(cells: &[Data]) -> String {
    cells
        .iter()
        .filter_map(|cell| match cell {
            Data::String(s) => Some(s.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(ADDRESS_SEPARATOR)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn skips_non_text_and_keeps_order() {
        let cells = vec![
            Data::String("a@x.com".into()),
            Data::Float(42.0),
            Data::String("b@x.com".into()),
        ];
        assert_eq!(join_addresses(&cells), "a@x.com; b@x.com");
    }

    #[test]
    fn single_address_has_no_separator() {
        assert_eq!(join_addresses(&[Data::String("a@x.com".into())]), "a@x.com");
    }

    #[test]
    fn no_text_gives_empty_string() {
        assert_eq!(join_addresses(&[Data::Empty, Data::Int(7)]), "");
        assert_eq!(join_addresses(&[]), "");
    }

    #[test]
    fn text_is_kept_verbatim() {
        let cells = vec![Data::String(" c@x.com ".into()), Data::String("  ".into())];
        assert_eq!(join_addresses(&cells), " c@x.com ;   ");
    }

    #[test]
    fn missing_primary_reported_before_copy() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("to.xlsx");
        let copy = dir.path().join("cc.xlsx");
        let err = resolve_recipients(&primary, &copy).unwrap_err();
        assert!(matches!(err, IngestError::MissingFile(p) if p == primary));
    }
}
