//! Locale-aware numeric cleanup for sheet cells.
//!
//! Sheet exports mix `10,50%`, `1\u{a0}234` and plain `12.5`. A cell that
//! cleans up into a finite number becomes [`CellValue::Number`] rounded to
//! [`NUMERIC_PRECISION`] decimals; anything else is kept verbatim as text.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const NUMERIC_PRECISION: i32 = 2;

const STRIPPED_CHARS: [char; 3] = ['%', '\u{a0}', '\u{202f}'];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Absent,
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) | Self::Absent => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            Self::Number(_) | Self::Absent => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// True for `Absent` and for text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Number(_) => false,
            Self::Text(value) => value.trim().is_empty(),
            Self::Absent => true,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Absent => f.write_str("-"),
        }
    }
}

/// Converts one raw cell. Never fails: unparseable input comes back as text.
pub fn normalize_cell(raw: &str) -> CellValue {
    match parse_locale_number(raw) {
        Some(value) => CellValue::Number(round_to_precision(value, NUMERIC_PRECISION)),
        None => CellValue::Text(raw.to_string()),
    }
}

/// Parses `raw` after stripping percent signs and non-breaking spaces and
/// mapping the decimal comma to a point. Non-finite results are rejected.
pub fn parse_locale_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| !STRIPPED_CHARS.contains(ch))
        .map(|ch| if ch == ',' { '.' } else { ch })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Rounds half to even at `decimals` places. Values too large to scale
/// without overflowing are returned unchanged.
pub fn round_to_precision(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round_ties_even() / factor
}
