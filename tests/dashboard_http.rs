use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use gexdash::{
    dashboard_router, BoardService, CellRange, GridSource, InMemoryGridSource, RawGrid,
    SheetLayout, SourceError, SystemClock,
};
use tower::util::ServiceExt;

fn service_for(source: Arc<dyn GridSource>) -> Arc<BoardService> {
    Arc::new(BoardService::new(
        source,
        SheetLayout::default(),
        Duration::from_secs(300),
        Arc::new(SystemClock),
    ))
}

async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|value| value.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, location, String::from_utf8(body.to_vec()).unwrap())
}

struct RejectingSource;

impl GridSource for RejectingSource {
    fn source_id(&self) -> String {
        "rejecting".to_string()
    }

    fn kind(&self) -> &'static str {
        "google_sheets"
    }

    fn fetch_ranges(&self, _ranges: &[CellRange]) -> Result<Vec<RawGrid>, SourceError> {
        Err(SourceError::Auth {
            url: "https://sheets.googleapis.com/v4/spreadsheets/doc123/values:batchGet"
                .to_string(),
            status: 403,
        })
    }
}

#[tokio::test]
async fn dashboard_page_renders_overview_and_selected_asset() {
    let app = dashboard_router(service_for(Arc::new(InMemoryGridSource::demo())));
    let (status, _, text) = send(app, "GET", "/dashboard?asset=RUT").await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("GEX Sentiment Dashboard"));
    assert!(text.contains("id=\"overview-table\""));
    assert!(text.contains("<th>Gamma Flip</th>"));
    assert!(text.contains("<option value=\"RUT\" selected>"));
    assert!(text.contains("2185.40"));
    assert!(text.contains("Data source: in_memory (memory:demo)"));
    assert!(!text.contains("COT DATA"));
}

#[tokio::test]
async fn snapshot_returns_joined_records_as_json() {
    let app = dashboard_router(service_for(Arc::new(InMemoryGridSource::demo())));
    let (status, _, text) = send(app, "GET", "/dashboard/snapshot").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["source"], "memory:demo");
    assert_eq!(json["cache_ttl_secs"], 300);
    let assets = json["assets"].as_array().unwrap();
    assert_eq!(assets.len(), 5);
    assert_eq!(assets[0]["underlying"], "SPX");
    assert_eq!(assets[0]["gamma_flip"], 5780.0);
    assert_eq!(json["missing_blocks"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn repeated_requests_within_ttl_fetch_once() {
    let source = InMemoryGridSource::demo();
    let app = dashboard_router(service_for(Arc::new(source.clone())));

    for _ in 0..3 {
        let (status, _, _) = send(app.clone(), "GET", "/dashboard").await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn refresh_refetches_and_redirects_to_dashboard() {
    let source = InMemoryGridSource::demo();
    let app = dashboard_router(service_for(Arc::new(source.clone())));

    let (status, _, _) = send(app.clone(), "GET", "/dashboard").await;
    assert_eq!(status, StatusCode::OK);

    source.replace_sheet(RawGrid::from_cells(vec![
        vec!["Underlying", "Bias"],
        vec!["NEW", "Long"],
    ]));
    let (status, _, text) = send(app.clone(), "GET", "/dashboard/snapshot").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("\"SPX\""));

    let (status, location, _) = send(app.clone(), "POST", "/dashboard/refresh").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/dashboard"));
    assert_eq!(source.fetch_count(), 2);

    let (_, _, text) = send(app, "GET", "/dashboard/snapshot").await;
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["assets"][0]["underlying"], "NEW");
    assert_eq!(json["missing_blocks"][0], "levels");
}

#[tokio::test]
async fn empty_sheet_renders_no_data_state() {
    let source = InMemoryGridSource::new("blank", RawGrid::default());
    let app = dashboard_router(service_for(Arc::new(source)));
    let (status, _, text) = send(app, "GET", "/dashboard").await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("No data"));
}

#[tokio::test]
async fn rejected_credentials_surface_as_bad_gateway() {
    let app = dashboard_router(service_for(Arc::new(RejectingSource)));

    let (status, _, text) = send(app.clone(), "GET", "/dashboard").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(text.contains("Data source error"));
    assert!(text.contains("rejected our credentials"));

    let (status, _, text) = send(app.clone(), "GET", "/dashboard/snapshot").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(json["error"].as_str().unwrap().contains("HTTP 403"));

    let (status, _, _) = send(app, "POST", "/dashboard/refresh").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}
