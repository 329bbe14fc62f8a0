#![cfg(feature = "live-sheets-tests")]

use std::sync::Arc;
use std::time::Duration;

use gexdash::{BoardService, DashboardConfig, SourceSelection, SystemClock};

/// Needs `GEXDASH_SHEET_ID` plus `GEXDASH_API_KEY` or `GEXDASH_ACCESS_TOKEN`
/// pointing at a worksheet with the production layout.
#[test]
fn live_sheet_yields_joined_assets() {
    let cfg = DashboardConfig::from_env().expect("live config should load from env");
    assert!(
        matches!(cfg.source, SourceSelection::GoogleSheets(_)),
        "live test needs GEXDASH_SHEET_ID, got {:?}",
        cfg.source.name()
    );

    let source = cfg.source.build().expect("sheets client should build");
    let service = BoardService::new(
        source,
        cfg.layout.clone(),
        Duration::from_secs(60),
        Arc::new(SystemClock),
    );

    let board = service.load().expect("live fetch should succeed");
    assert!(!board.is_empty(), "live sheet returned no assets");
    assert!(board.missing_blocks.is_empty(), "{:?}", board.missing_blocks);
    assert!(board.records.iter().any(|record| record.spot.is_some()));

    let again = service.load().expect("cached load should succeed");
    assert!(Arc::ptr_eq(&board, &again));
}
