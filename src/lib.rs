//! GEX sentiment dashboard core crate.
//!
//! Current implemented scope:
//! - A1 ranges, raw sheet grids and cell normalization
//! - block location, table materialization and the overview/levels left join
//! - Google Sheets, CSV and in-memory grid sources behind a TTL cache
//! - the HTML dashboard, JSON snapshot and manual refresh routes

mod blocks;
mod board;
mod cache;
mod config;
mod dashboard;
mod grid;
mod join;
mod normalize;
mod observability;
mod source;
mod table;

pub use blocks::{find_marker_row, locate_blocks, BlockBounds, MarkerSpec};
pub use board::{
    derive_regime, derive_score, parse_sheet, AssetBoard, AssetColumns, AssetRecord,
    BoardService, ParsedSheet, SheetLayout, NEGATIVE_GAMMA, POSITIVE_GAMMA, SCORE_BOUND,
};
pub use cache::{CacheKey, CacheState, Clock, ManualClock, SystemClock, TtlCache};
pub use config::{
    ConfigError, DashboardConfig, SourceSelection, DEFAULT_BIND_ADDR, DEFAULT_CACHE_TTL_SECS,
    DEFAULT_SHEET_TAB,
};
pub use dashboard::{
    dashboard_router, format_level, format_score, label_color, levels_chart_svg,
    render_dashboard_html, render_error_html, score_gauge_svg, select_asset, DashboardQuery,
    SnapshotBody, BIAS_COLORS, FALLBACK_LABEL_COLOR, METHODOLOGY_NOTE, OVERVIEW_HEADERS,
    RECOMMENDATION_COLORS, REGIME_COLORS,
};
pub use grid::{column_index, column_letters, CellRange, CellRef, RangeError, RawGrid};
pub use join::{left_join, JoinError, RESERVED_SECTION_MARKERS};
pub use normalize::{
    normalize_cell, parse_locale_number, round_to_precision, CellValue, NUMERIC_PRECISION,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_source_selected, LogFormat, LoggingConfig,
    LoggingInitError, DEFAULT_LOG_LEVEL,
};
pub use source::{
    crop, demo_sheet, CsvGridSource, GoogleSheetsConfig, GoogleSheetsSource, GridSource,
    InMemoryGridSource, SheetCredential, SourceError, GOOGLE_SHEETS_BASE_URL,
};
pub use table::{
    materialize, materialize_block, HeaderSource, MaterializeRequest, Table, TableError,
};
