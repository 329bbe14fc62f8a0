//! Fetch-and-parse pipeline producing the per-asset board.
//!
//! One fetch reads the configured sheet range, locates the overview and the
//! GEX levels blocks, materializes both, joins levels onto the overview by
//! underlying, and turns every joined row into an [`AssetRecord`]. A block
//! that cannot be found or materialized becomes an empty placeholder so the
//! rest of the board still renders.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::blocks::{locate_blocks, BlockBounds, MarkerSpec};
use crate::cache::{CacheKey, CacheState, Clock, TtlCache};
use crate::grid::{CellRange, CellRef, RawGrid};
use crate::join::{left_join, RESERVED_SECTION_MARKERS};
use crate::normalize::{round_to_precision, CellValue, NUMERIC_PRECISION};
use crate::source::{GridSource, SourceError};
use crate::table::{materialize_block, Table};

pub const SCORE_BOUND: f64 = 2.0;
pub const POSITIVE_GAMMA: &str = "Positive Gamma";
pub const NEGATIVE_GAMMA: &str = "Negative Gamma";

/// Column names read from the joined table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetColumns {
    pub underlying: String,
    pub spot: String,
    pub gamma_flip: String,
    pub put_wall: String,
    pub call_wall: String,
    pub score: String,
    pub regime: String,
    pub bias: String,
    pub recommendation: String,
}

impl Default for AssetColumns {
    fn default() -> Self {
        Self {
            underlying: "Underlying".to_string(),
            spot: "Spot".to_string(),
            gamma_flip: "Gamma Flip".to_string(),
            put_wall: "Put Wall".to_string(),
            call_wall: "Call Wall".to_string(),
            score: "Score".to_string(),
            regime: "Regime".to_string(),
            bias: "Bias".to_string(),
            recommendation: "Recommendation".to_string(),
        }
    }
}

impl AssetColumns {
    pub fn numeric(&self) -> Vec<String> {
        vec![
            self.spot.clone(),
            self.gamma_flip.clone(),
            self.put_wall.clone(),
            self.call_wall.clone(),
            self.score.clone(),
        ]
    }
}

/// Where the blocks live inside the worksheet and how to read them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetLayout {
    pub range: CellRange,
    pub overview: MarkerSpec,
    /// Only used when `overview` is a fixed range without a header row.
    pub overview_headers: Option<Vec<String>>,
    pub levels: MarkerSpec,
    pub levels_headers: Option<Vec<String>>,
    pub stop_labels: Vec<String>,
    pub reserved_keys: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub columns: AssetColumns,
}

impl Default for SheetLayout {
    fn default() -> Self {
        let columns = AssetColumns::default();
        Self {
            range: CellRange::new(CellRef::new(0, 0), CellRef::new(199, 11)),
            overview: MarkerSpec::header_label(columns.underlying.clone()),
            overview_headers: None,
            levels: MarkerSpec::section_title("GEX Data"),
            levels_headers: None,
            stop_labels: vec!["COT DATA".to_string(), "Retail Positioning".to_string()],
            reserved_keys: RESERVED_SECTION_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
            numeric_columns: columns.numeric(),
            columns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub underlying: String,
    pub spot: Option<f64>,
    pub gamma_flip: Option<f64>,
    pub put_wall: Option<f64>,
    pub call_wall: Option<f64>,
    pub score: Option<f64>,
    pub regime: Option<String>,
    pub bias: Option<String>,
    pub recommendation: Option<String>,
    /// Set when `score` was computed from the levels instead of read.
    pub score_derived: bool,
    pub regime_derived: bool,
}

impl AssetRecord {
    /// Reads one joined row. Numeric fields only take numeric cells; text
    /// fields only take non-blank text. Missing regime and score are filled
    /// in from spot, flip and walls when those are present.
    pub fn from_row(table: &Table, row: usize, columns: &AssetColumns) -> Option<Self> {
        let underlying = text_field(table, row, &columns.underlying)?;
        let number = |name: &str| table.value(row, name).and_then(CellValue::as_number);

        let mut record = Self {
            underlying,
            spot: number(&columns.spot),
            gamma_flip: number(&columns.gamma_flip),
            put_wall: number(&columns.put_wall),
            call_wall: number(&columns.call_wall),
            score: number(&columns.score),
            regime: text_field(table, row, &columns.regime),
            bias: text_field(table, row, &columns.bias),
            recommendation: text_field(table, row, &columns.recommendation),
            score_derived: false,
            regime_derived: false,
        };

        if record.regime.is_none() {
            if let Some(regime) = derive_regime(record.spot, record.gamma_flip) {
                record.regime = Some(regime.to_string());
                record.regime_derived = true;
            }
        }
        if record.score.is_none() {
            if let Some(score) = derive_score(
                record.spot,
                record.gamma_flip,
                record.put_wall,
                record.call_wall,
            ) {
                record.score = Some(score);
                record.score_derived = true;
            }
        }

        Some(record)
    }
}

fn text_field(table: &Table, row: usize, column: &str) -> Option<String> {
    match table.value(row, column)? {
        CellValue::Text(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        CellValue::Number(value) => Some(value.to_string()),
        CellValue::Text(_) | CellValue::Absent => None,
    }
}

/// Spot at or above the gamma flip is positive gamma, below it negative.
pub fn derive_regime(spot: Option<f64>, gamma_flip: Option<f64>) -> Option<&'static str> {
    let (spot, flip) = (spot?, gamma_flip?);
    Some(if spot >= flip {
        POSITIVE_GAMMA
    } else {
        NEGATIVE_GAMMA
    })
}

/// Distance from the flip towards the wall on the spot's side, scaled so the
/// wall sits at ±2 and clamped to that bound.
pub fn derive_score(
    spot: Option<f64>,
    gamma_flip: Option<f64>,
    put_wall: Option<f64>,
    call_wall: Option<f64>,
) -> Option<f64> {
    let (spot, flip) = (spot?, gamma_flip?);
    let raw = if spot >= flip {
        let span = call_wall? - flip;
        if span <= 0.0 {
            return None;
        }
        SCORE_BOUND * (spot - flip) / span
    } else {
        let span = flip - put_wall?;
        if span <= 0.0 {
            return None;
        }
        -SCORE_BOUND * (flip - spot) / span
    };

    Some(round_to_precision(
        raw.clamp(-SCORE_BOUND, SCORE_BOUND),
        NUMERIC_PRECISION,
    ))
}

/// Result of one pipeline run. Rebuilt on every fetch, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBoard {
    pub source_id: String,
    pub source_kind: String,
    pub range: String,
    pub fetched_at: DateTime<Utc>,
    pub records: Vec<AssetRecord>,
    pub overview: Table,
    pub levels: Table,
    pub joined: Table,
    /// Blocks that were absent or unreadable and replaced by placeholders.
    pub missing_blocks: Vec<String>,
}

impl AssetBoard {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, underlying: &str) -> Option<&AssetRecord> {
        self.records
            .iter()
            .find(|record| record.underlying == underlying)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSheet {
    pub overview: Table,
    pub levels: Table,
    pub joined: Table,
    pub records: Vec<AssetRecord>,
    pub missing_blocks: Vec<String>,
}

/// Runs locate, materialize, join and record extraction over one grid.
pub fn parse_sheet(grid: &RawGrid, layout: &SheetLayout) -> ParsedSheet {
    let key = layout.columns.underlying.as_str();
    let stop_labels: Vec<&str> = layout.stop_labels.iter().map(String::as_str).collect();
    let located = locate_blocks(
        grid,
        &[layout.overview.clone(), layout.levels.clone()],
        &stop_labels,
    );

    let mut missing_blocks = Vec::new();
    let overview = read_block(
        grid,
        "overview",
        &layout.overview,
        located[0].as_ref(),
        layout.overview_headers.as_deref(),
        layout,
        &mut missing_blocks,
    );
    let levels = read_block(
        grid,
        "levels",
        &layout.levels,
        located[1].as_ref(),
        layout.levels_headers.as_deref(),
        layout,
        &mut missing_blocks,
    );

    let reserved: Vec<&str> = layout.reserved_keys.iter().map(String::as_str).collect();
    let joined = match left_join(&overview, &levels, key, &reserved) {
        Ok(joined) => joined,
        Err(err) => {
            warn!(
                component = "pipeline",
                event = "pipeline.join.failed",
                key,
                error = %err
            );
            overview.clone()
        }
    };

    let records = (0..joined.len())
        .filter_map(|row| AssetRecord::from_row(&joined, row, &layout.columns))
        .collect();

    ParsedSheet {
        overview,
        levels,
        joined,
        records,
        missing_blocks,
    }
}

fn read_block(
    grid: &RawGrid,
    name: &str,
    marker: &MarkerSpec,
    bounds: Option<&BlockBounds>,
    explicit_headers: Option<&[String]>,
    layout: &SheetLayout,
    missing: &mut Vec<String>,
) -> Table {
    let key = layout.columns.underlying.as_str();
    let Some(bounds) = bounds else {
        warn!(
            component = "pipeline",
            event = "pipeline.block.missing",
            block = name,
            marker = %marker.describe()
        );
        missing.push(name.to_string());
        return placeholder(key);
    };

    match materialize_block(grid, bounds, explicit_headers, &layout.numeric_columns) {
        Ok(table) if table.has_column(key) => table,
        Ok(_) => {
            warn!(
                component = "pipeline",
                event = "pipeline.block.missing_key",
                block = name,
                key
            );
            missing.push(name.to_string());
            placeholder(key)
        }
        Err(err) => {
            warn!(
                component = "pipeline",
                event = "pipeline.block.unreadable",
                block = name,
                error = %err
            );
            missing.push(name.to_string());
            placeholder(key)
        }
    }
}

/// Empty table carrying only the key column, so joins still line up.
fn placeholder(key: &str) -> Table {
    Table::new(vec![key.to_string()]).unwrap_or_default()
}

/// Owns the source, layout and cache for the dashboard.
pub struct BoardService {
    source: Arc<dyn GridSource>,
    layout: SheetLayout,
    cache: TtlCache<CacheKey, Arc<AssetBoard>>,
    clock: Arc<dyn Clock>,
}

impl BoardService {
    pub fn new(
        source: Arc<dyn GridSource>,
        layout: SheetLayout,
        ttl: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            layout,
            cache: TtlCache::new(ttl, Arc::clone(&clock)),
            clock,
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.source.source_id(), vec![self.layout.range.to_a1()])
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        self.cache.ttl()
    }

    pub fn cache_state(&self) -> CacheState {
        self.cache.state(&self.cache_key())
    }

    pub fn source_kind(&self) -> &'static str {
        self.source.kind()
    }

    /// Cached board, fetching when the entry is empty or stale.
    pub fn load(&self) -> Result<Arc<AssetBoard>, SourceError> {
        self.cache.get(&self.cache_key(), || self.fetch_board().map(Arc::new))
    }

    /// Drops the cached board and fetches a new one.
    pub fn refresh(&self) -> Result<Arc<AssetBoard>, SourceError> {
        self.cache.invalidate(&self.cache_key());
        self.load()
    }

    fn fetch_board(&self) -> Result<AssetBoard, SourceError> {
        let grid = self.source.fetch_range(&self.layout.range)?;
        let parsed = parse_sheet(&grid, &self.layout);

        info!(
            component = "pipeline",
            event = "pipeline.complete",
            source = %self.source.source_id(),
            grid_rows = grid.len(),
            assets = parsed.records.len(),
            missing_blocks = parsed.missing_blocks.len()
        );

        Ok(AssetBoard {
            source_id: self.source.source_id(),
            source_kind: self.source.kind().to_string(),
            range: self.layout.range.to_a1(),
            fetched_at: self.clock.now(),
            records: parsed.records,
            overview: parsed.overview,
            levels: parsed.levels,
            joined: parsed.joined,
            missing_blocks: parsed.missing_blocks,
        })
    }
}
