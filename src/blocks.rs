//! Locating stacked sub-tables inside a raw sheet grid.
//!
//! A worksheet carries several tables one under another: an overview block
//! whose header row holds a sentinel column name, a titled "GEX Data" block,
//! and trailing sections that are not read at all. Each block runs from its
//! header row down to the row before the next marker, or to the end of the
//! grid.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::grid::{CellRange, RawGrid};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerSpec {
    /// Block found by content: the first row holding a cell equal to `label`.
    /// The header sits `header_offset` rows below that row (0 when the label
    /// is itself a header cell, 1 for a section title above the header).
    Label { label: String, header_offset: usize },
    /// Block at a fixed sheet range. When `header_in_range` is false the
    /// first row is already data and headers come from configuration.
    Fixed {
        range: CellRange,
        header_in_range: bool,
    },
}

impl MarkerSpec {
    pub fn header_label(label: impl Into<String>) -> Self {
        Self::Label {
            label: label.into(),
            header_offset: 0,
        }
    }

    pub fn section_title(label: impl Into<String>) -> Self {
        Self::Label {
            label: label.into(),
            header_offset: 1,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Label { label, .. } => format!("label '{label}'"),
            Self::Fixed { range, .. } => format!("range {range}"),
        }
    }
}

/// Resolved location of one block, in grid-relative row/column indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBounds {
    pub marker_row: usize,
    pub header_row: Option<usize>,
    pub body_start: usize,
    /// Inclusive.
    pub end_row: usize,
    pub first_col: usize,
    pub col_count: Option<usize>,
}

impl BlockBounds {
    pub fn body_rows(&self) -> Range<usize> {
        self.body_start..self.end_row.saturating_add(1).max(self.body_start)
    }
}

/// Index of the first row (top to bottom) with a cell equal to `label` after
/// trimming both sides. Later rows carrying the same label are ignored.
pub fn find_marker_row(grid: &RawGrid, label: &str) -> Option<usize> {
    let wanted = label.trim();
    grid.rows
        .iter()
        .position(|row| row.iter().any(|cell| cell.trim() == wanted))
}

/// Resolves every marker against `grid`. Entries are `None` when a label is
/// not present, when its header offset would run past the grid, or when a
/// fixed range lies outside it.
///
/// `stop_labels` name sections that only terminate the block above them.
pub fn locate_blocks(
    grid: &RawGrid,
    markers: &[MarkerSpec],
    stop_labels: &[&str],
) -> Vec<Option<BlockBounds>> {
    let label_rows: Vec<Option<usize>> = markers
        .iter()
        .map(|marker| match marker {
            MarkerSpec::Label { label, .. } => find_marker_row(grid, label),
            MarkerSpec::Fixed { .. } => None,
        })
        .collect();

    let mut boundaries: Vec<usize> = label_rows
        .iter()
        .flatten()
        .copied()
        .chain(
            stop_labels
                .iter()
                .filter_map(|label| find_marker_row(grid, label)),
        )
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    markers
        .iter()
        .zip(label_rows)
        .map(|(marker, marker_row)| match marker {
            MarkerSpec::Label { header_offset, .. } => {
                let marker_row = marker_row?;
                let header_row = marker_row.checked_add(*header_offset)?;
                if header_row >= grid.len() {
                    return None;
                }
                let end_row = boundaries
                    .iter()
                    .find(|row| **row > header_row)
                    .map(|next| next - 1)
                    .unwrap_or(grid.len() - 1);

                Some(BlockBounds {
                    marker_row,
                    header_row: Some(header_row),
                    body_start: header_row + 1,
                    end_row,
                    first_col: 0,
                    col_count: None,
                })
            }
            MarkerSpec::Fixed {
                range,
                header_in_range,
            } => {
                let (first_row, last_row, first_col, col_count) = grid.relative_bounds(range)?;
                let (header_row, body_start) = if *header_in_range {
                    (Some(first_row), first_row + 1)
                } else {
                    (None, first_row)
                };

                Some(BlockBounds {
                    marker_row: first_row,
                    header_row,
                    body_start,
                    end_row: last_row,
                    first_col,
                    col_count: Some(col_count),
                })
            }
        })
        .collect()
}
