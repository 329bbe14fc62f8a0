//! Left join of two materialized tables on a shared key column.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::normalize::CellValue;
use crate::table::{Table, TableError};

/// Section titles that can leak into a block body when a configured range is
/// one row too long. Rows keyed by one of these are dropped from join output.
pub const RESERVED_SECTION_MARKERS: [&str; 4] =
    ["Overview", "GEX Data", "COT DATA", "Retail Positioning"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("key column '{key}' missing from {side} table")]
    MissingKeyColumn { side: &'static str, key: String },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Joins `right` onto `left` by `key`.
///
/// Output columns are the left columns followed by the right columns other
/// than the key; a right column whose name is already on the left is skipped.
/// Every left row yields exactly one output row, in left order, except rows
/// keyed by one of `reserved_keys`. Keys match after trimming, case-sensitive.
/// The first right row per key is used; unmatched rows get
/// [`CellValue::Absent`] in every right-only column.
pub fn left_join(
    left: &Table,
    right: &Table,
    key: &str,
    reserved_keys: &[&str],
) -> Result<Table, JoinError> {
    let left_key = left
        .column_index(key)
        .ok_or_else(|| JoinError::MissingKeyColumn {
            side: "left",
            key: key.to_string(),
        })?;
    let right_key = right
        .column_index(key)
        .ok_or_else(|| JoinError::MissingKeyColumn {
            side: "right",
            key: key.to_string(),
        })?;

    let right_columns: Vec<usize> = right
        .columns()
        .iter()
        .enumerate()
        .filter(|(idx, name)| {
            if *idx == right_key {
                return false;
            }
            if left.has_column(name) {
                debug!(
                    component = "join",
                    event = "join.column.shadowed",
                    column = %name
                );
                return false;
            }
            true
        })
        .map(|(idx, _)| idx)
        .collect();

    let mut first_match: HashMap<String, usize> = HashMap::with_capacity(right.len());
    for (row_idx, row) in right.rows().iter().enumerate() {
        first_match
            .entry(key_text(&row[right_key]))
            .or_insert(row_idx);
    }

    let mut columns = left.columns().to_vec();
    columns.extend(right_columns.iter().map(|idx| right.columns()[*idx].clone()));
    let mut out = Table::new(columns)?;

    for row in left.rows() {
        let key_value = key_text(&row[left_key]);
        if reserved_keys.contains(&key_value.as_str()) {
            debug!(
                component = "join",
                event = "join.row.reserved_key",
                key = %key_value
            );
            continue;
        }

        let matched = first_match.get(&key_value).map(|idx| &right.rows()[*idx]);
        let mut values = row.clone();
        values.extend(right_columns.iter().map(|col| match matched {
            Some(right_row) => right_row[*col].clone(),
            None => CellValue::Absent,
        }));
        out.push_row(values)?;
    }

    Ok(out)
}

fn key_text(value: &CellValue) -> String {
    match value {
        CellValue::Text(text) => text.trim().to_string(),
        CellValue::Number(number) => number.to_string(),
        CellValue::Absent => String::new(),
    }
}
