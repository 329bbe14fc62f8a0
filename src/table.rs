//! Typed tables materialized from raw grid blocks.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blocks::BlockBounds;
use crate::grid::RawGrid;
use crate::normalize::{normalize_cell, CellValue};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
    #[error("row has {found} values, table has {expected} columns")]
    RowWidth { expected: usize, found: usize },
}

/// Ordered column names plus row-major values aligned to them.
///
/// Column names are unique; row and column order follow the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Result<Self, TableError> {
        for (idx, name) in columns.iter().enumerate() {
            if columns[..idx].contains(name) {
                return Err(TableError::DuplicateColumn(name.clone()));
            }
        }

        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|values| values.get(idx))
    }

    pub fn column_values(&self, column: &str) -> Option<Vec<&CellValue>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// `(column, value)` pairs of one row in column order.
    pub fn row_entries(&self, row: usize) -> Option<Vec<(&str, &CellValue)>> {
        let values = self.rows.get(row)?;
        Some(
            self.columns
                .iter()
                .map(String::as_str)
                .zip(values.iter())
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub enum HeaderSource<'a> {
    /// Grid row holding the header cells; names are trimmed.
    Row(usize),
    /// Names used verbatim, for blocks without an in-sheet header.
    Explicit(&'a [String]),
}

#[derive(Debug, Clone)]
pub struct MaterializeRequest<'a, N: AsRef<str>> {
    pub header: HeaderSource<'a>,
    pub body: Range<usize>,
    pub first_col: usize,
    pub col_count: Option<usize>,
    pub numeric_columns: &'a [N],
}

/// Copies a block out of `grid` into an owned [`Table`].
///
/// Header cells that are blank after trimming are spacer columns and are
/// skipped along with the cells beneath them. Body rows whose named cells
/// are all blank are dropped. Cells under a `numeric_columns` name go
/// through [`normalize_cell`]; the rest stay text.
pub fn materialize<N: AsRef<str>>(
    grid: &RawGrid,
    req: &MaterializeRequest<'_, N>,
) -> Result<Table, TableError> {
    let (offsets, columns): (Vec<usize>, Vec<String>) = match req.header {
        HeaderSource::Row(row) => header_from_row(grid, row, req.first_col, req.col_count)
            .into_iter()
            .unzip(),
        HeaderSource::Explicit(names) => names.iter().cloned().enumerate().unzip(),
    };
    let numeric: Vec<bool> = columns
        .iter()
        .map(|name| {
            req.numeric_columns
                .iter()
                .any(|wanted| wanted.as_ref() == name)
        })
        .collect();

    let mut table = Table::new(columns)?;
    let body_end = req.body.end.min(grid.len());

    for row_idx in req.body.start..body_end {
        let cells: Vec<&str> = offsets
            .iter()
            .map(|offset| grid.cell(row_idx, req.first_col + offset))
            .collect();
        if cells.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let values = cells
            .iter()
            .zip(&numeric)
            .map(|(cell, is_numeric)| {
                if *is_numeric {
                    normalize_cell(cell)
                } else {
                    CellValue::text(*cell)
                }
            })
            .collect();
        table.push_row(values)?;
    }

    Ok(table)
}

/// Materializes a located block. `explicit_headers` is required for fixed
/// blocks that carry no header row and is ignored otherwise.
pub fn materialize_block<N: AsRef<str>>(
    grid: &RawGrid,
    bounds: &BlockBounds,
    explicit_headers: Option<&[String]>,
    numeric_columns: &[N],
) -> Result<Table, TableError> {
    let header = match (bounds.header_row, explicit_headers) {
        (Some(row), _) => HeaderSource::Row(row),
        (None, Some(names)) => HeaderSource::Explicit(names),
        (None, None) => HeaderSource::Explicit(&[]),
    };

    materialize(
        grid,
        &MaterializeRequest {
            header,
            body: bounds.body_rows(),
            first_col: bounds.first_col,
            col_count: bounds.col_count,
            numeric_columns,
        },
    )
}

/// Named header cells as `(offset from first_col, trimmed name)`.
fn header_from_row(
    grid: &RawGrid,
    row: usize,
    first_col: usize,
    col_count: Option<usize>,
) -> Vec<(usize, String)> {
    let row_len = grid.row(row).map(<[String]>::len).unwrap_or(0);
    let last_col = match col_count {
        Some(count) => first_col + count,
        None => row_len,
    };

    (first_col..last_col.max(first_col))
        .map(|col| (col - first_col, grid.cell(row, col).trim().to_string()))
        .filter(|(_, name)| !name.is_empty())
        .collect()
}
