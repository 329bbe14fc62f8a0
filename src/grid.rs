//! Raw cell grids and spreadsheet-style `A1` range addressing.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid A1 range '{0}'")]
    Format(String),
    #[error("row number must start at 1 in '{0}'")]
    ZeroRow(String),
}

/// Zero-based cell coordinate. `A1` is `{ row: 0, col: 0 }`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub const ORIGIN: CellRef = CellRef { row: 0, col: 0 };

    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub fn to_a1(self) -> String {
        format!("{}{}", column_letters(self.col), self.row + 1)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// Rectangular range such as `A1:F10` or `'Sentiment Tab'!B3:H40`.
///
/// A single cell (`C7`) parses as a one-cell range. Reversed corners are
/// normalized so `start` is always the top-left cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRange {
    pub sheet: Option<String>,
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn new(start: CellRef, end: CellRef) -> Self {
        Self {
            sheet: None,
            start: CellRef::new(start.row.min(end.row), start.col.min(end.col)),
            end: CellRef::new(start.row.max(end.row), start.col.max(end.col)),
        }
    }

    pub fn parse(input: &str) -> Result<Self, RangeError> {
        let trimmed = input.trim();
        let captures = a1_pattern()
            .captures(trimmed)
            .ok_or_else(|| RangeError::Format(trimmed.to_string()))?;

        let sheet = captures
            .get(1)
            .map(|quoted| quoted.as_str().replace("''", "'"))
            .or_else(|| captures.get(2).map(|plain| plain.as_str().to_string()));

        let start = cell_ref_from_parts(trimmed, &captures[3], &captures[4])?;
        let end = match (captures.get(5), captures.get(6)) {
            (Some(col), Some(row)) => cell_ref_from_parts(trimmed, col.as_str(), row.as_str())?,
            _ => start,
        };

        let mut range = Self::new(start, end);
        range.sheet = sheet;
        Ok(range)
    }

    pub fn on_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    pub fn row_count(&self) -> usize {
        self.end.row - self.start.row + 1
    }

    pub fn col_count(&self) -> usize {
        self.end.col - self.start.col + 1
    }

    /// Formats back to `A1` notation, quoting the sheet name when needed.
    pub fn to_a1(&self) -> String {
        let cells = if self.start == self.end {
            self.start.to_a1()
        } else {
            format!("{}:{}", self.start.to_a1(), self.end.to_a1())
        };

        match &self.sheet {
            Some(sheet) if needs_quotes(sheet) => {
                format!("'{}'!{}", sheet.replace('\'', "''"), cells)
            }
            Some(sheet) => format!("{sheet}!{cells}"),
            None => cells,
        }
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

impl std::str::FromStr for CellRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Converts column letters (`A`, `Z`, `AA`) to a zero-based index.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }

    letters.chars().try_fold(0usize, |acc, ch| {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        acc.checked_mul(26)?.checked_add(digit)
    })
    .map(|one_based| one_based - 1)
}

pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn a1_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:(?:'((?:[^']|'')+)'|([A-Za-z0-9_]+))!)?([A-Za-z]{1,3})(\d+)(?::([A-Za-z]{1,3})(\d+))?$",
        )
        .expect("hardcoded A1 pattern")
    })
}

fn cell_ref_from_parts(input: &str, letters: &str, digits: &str) -> Result<CellRef, RangeError> {
    let col = column_index(letters).ok_or_else(|| RangeError::Format(input.to_string()))?;
    let row_number: usize = digits
        .parse()
        .map_err(|_| RangeError::Format(input.to_string()))?;
    if row_number == 0 {
        return Err(RangeError::ZeroRow(input.to_string()));
    }
    Ok(CellRef::new(row_number - 1, col))
}

fn needs_quotes(sheet: &str) -> bool {
    !sheet
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Ordered rows of text cells as delivered by a source. Rows may be ragged.
///
/// `origin` is the sheet coordinate of `rows[0][0]`, so absolute ranges from
/// configuration can be translated into grid indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawGrid {
    pub origin: CellRef,
    pub rows: Vec<Vec<String>>,
}

impl RawGrid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self {
            origin: CellRef::ORIGIN,
            rows,
        }
    }

    pub fn from_cells<R, C>(rows: impl IntoIterator<Item = R>) -> Self
    where
        R: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self::new(
            rows.into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        )
    }

    pub fn with_origin(mut self, origin: CellRef) -> Self {
        self.origin = origin;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<&[String]> {
        self.rows.get(idx).map(Vec::as_slice)
    }

    /// Cell text, or `""` outside the ragged edge.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Translates an absolute sheet range into grid-relative `(first_row,
    /// last_row, first_col, col_count)`. Returns `None` when the range starts
    /// above or left of the grid, or below its last row.
    pub fn relative_bounds(&self, range: &CellRange) -> Option<(usize, usize, usize, usize)> {
        let first_row = range.start.row.checked_sub(self.origin.row)?;
        let first_col = range.start.col.checked_sub(self.origin.col)?;
        if first_row >= self.len() {
            return None;
        }
        let last_row = (range.end.row - self.origin.row).min(self.len() - 1);
        Some((first_row, last_row, first_col, range.col_count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_sheet_qualified_ranges() {
        let range = CellRange::parse("A1:F10").unwrap();
        assert_eq!(range.start, CellRef::new(0, 0));
        assert_eq!(range.end, CellRef::new(9, 5));
        assert_eq!(range.sheet, None);

        let quoted = CellRange::parse("'Sentiment Tab'!b3:h40").unwrap();
        assert_eq!(quoted.sheet.as_deref(), Some("Sentiment Tab"));
        assert_eq!(quoted.start, CellRef::new(2, 1));
        assert_eq!(quoted.end, CellRef::new(39, 7));

        let plain = CellRange::parse("Data!AA2:AB3").unwrap();
        assert_eq!(plain.sheet.as_deref(), Some("Data"));
        assert_eq!(plain.start.col, 26);
    }

    #[test]
    fn formatting_preserves_a1_grammar() {
        for raw in ["A1:F10", "'Sentiment Tab'!B3:H40", "Data!C7", "'It''s'!A1:B2"] {
            assert_eq!(CellRange::parse(raw).unwrap().to_a1(), raw);
        }
    }

    #[test]
    fn reversed_corners_are_normalized() {
        let range = CellRange::parse("F10:A1").unwrap();
        assert_eq!(range.to_a1(), "A1:F10");
        assert_eq!(range.row_count(), 10);
        assert_eq!(range.col_count(), 6);
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        assert!(matches!(CellRange::parse("A0:B2"), Err(RangeError::ZeroRow(_))));
        assert!(matches!(CellRange::parse("1A:B2"), Err(RangeError::Format(_))));
        assert!(matches!(CellRange::parse(""), Err(RangeError::Format(_))));
    }

    #[test]
    fn column_letters_round_trip() {
        assert_eq!(column_index("A"), Some(0));
        assert_eq!(column_index("Z"), Some(25));
        assert_eq!(column_index("AA"), Some(26));
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(27), "AB");
        assert_eq!(column_letters(701), "ZZ");
    }

    #[test]
    fn default_grid_is_empty_at_a1() {
        let grid = RawGrid::default();
        assert!(grid.is_empty());
        assert_eq!(grid.origin, CellRef::ORIGIN);
        assert_eq!(CellRef::default().to_a1(), "A1");
    }

    #[test]
    fn ragged_cells_read_as_empty() {
        let grid = RawGrid::from_cells(vec![vec!["a", "b"], vec!["c"]]);
        assert_eq!(grid.cell(1, 1), "");
        assert_eq!(grid.cell(5, 0), "");
        assert_eq!(grid.width(), 2);
    }

    #[test]
    fn relative_bounds_respect_origin_and_grid_end() {
        let grid = RawGrid::from_cells(vec![vec!["x"]; 5]).with_origin(CellRef::new(2, 1));
        let range = CellRange::parse("C4:E20").unwrap();
        assert_eq!(grid.relative_bounds(&range), Some((1, 4, 1, 3)));

        let above = CellRange::parse("B1:C2").unwrap();
        assert_eq!(grid.relative_bounds(&above), None);
        let below = CellRange::parse("B30:C31").unwrap();
        assert_eq!(grid.relative_bounds(&below), None);
    }
}
