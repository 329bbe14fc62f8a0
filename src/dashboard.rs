//! Dashboard page, JSON snapshot and manual refresh routes.

use std::f64::consts::PI;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::board::{AssetBoard, AssetRecord, BoardService, SCORE_BOUND};
use crate::source::SourceError;

pub const OVERVIEW_HEADERS: [&str; 9] = [
    "Underlying",
    "Spot",
    "Gamma Flip",
    "Put Wall",
    "Call Wall",
    "Regime",
    "Bias",
    "Recommendation",
    "Score",
];

pub const FALLBACK_LABEL_COLOR: &str = "#9aa0a6";

pub const REGIME_COLORS: [(&str, &str); 4] = [
    ("Positive Gamma", "#2e7d32"),
    ("Negative Gamma", "#c62828"),
    ("Neutral", "#607d8b"),
    ("Transition", "#f9a825"),
];

pub const BIAS_COLORS: [(&str, &str); 5] = [
    ("Bullish", "#2e7d32"),
    ("Long", "#2e7d32"),
    ("Neutral", "#607d8b"),
    ("Bearish", "#c62828"),
    ("Short", "#c62828"),
];

pub const RECOMMENDATION_COLORS: [(&str, &str); 6] = [
    ("Buy", "#1b5e20"),
    ("Buy Dips", "#43a047"),
    ("Hold", "#607d8b"),
    ("Hedge", "#ef6c00"),
    ("Sell Rallies", "#e53935"),
    ("Sell", "#b71c1c"),
];

pub const METHODOLOGY_NOTE: &str = "Methodology: flip-based regime; walls only as extreme zones (crash/breakout). Score = normalized distance flip to wall (-2 to +2).";

/// Color for `label` in `palette`, grey when unknown.
pub fn label_color(palette: &[(&str, &'static str)], label: &str) -> &'static str {
    palette
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, color)| *color)
        .unwrap_or(FALLBACK_LABEL_COLOR)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DashboardQuery {
    pub asset: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotBody {
    pub source: String,
    pub source_kind: String,
    pub range: String,
    pub fetched_at: String,
    pub cache_ttl_secs: u64,
    pub assets: Vec<AssetRecord>,
    pub missing_blocks: Vec<String>,
}

impl SnapshotBody {
    pub fn from_board(board: &AssetBoard, cache_ttl_secs: u64) -> Self {
        Self {
            source: board.source_id.clone(),
            source_kind: board.source_kind.clone(),
            range: board.range.clone(),
            fetched_at: board.fetched_at.to_rfc3339(),
            cache_ttl_secs,
            assets: board.records.clone(),
            missing_blocks: board.missing_blocks.clone(),
        }
    }
}

pub fn dashboard_router(service: Arc<BoardService>) -> Router {
    Router::new()
        .route("/dashboard", get(get_dashboard_html))
        .route("/dashboard/snapshot", get(get_dashboard_snapshot))
        .route("/dashboard/refresh", post(post_dashboard_refresh))
        .with_state(DashboardAppState { service })
}

/// Picks the requested asset when it exists, otherwise the first one.
pub fn select_asset<'a>(board: &'a AssetBoard, requested: Option<&str>) -> Option<&'a AssetRecord> {
    requested
        .and_then(|name| board.record(name.trim()))
        .or_else(|| board.records.first())
}

pub fn render_dashboard_html(
    board: &AssetBoard,
    requested_asset: Option<&str>,
    cache_ttl_secs: u64,
) -> String {
    let now_utc = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let fetched = board.fetched_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();

    let mut out = page_head("GEX Sentiment Dashboard");
    out.push_str("<section class=\"hero\"><h1>GEX Sentiment Dashboard</h1>");
    out.push_str("<div class=\"hero-meta\">\n");
    out.push_str(&format!("<span>Assets: {}</span>", board.records.len()));
    out.push_str(&format!("<span>Fetched: {}</span>", escape_html(&fetched)));
    out.push_str(&format!("<span>Cache TTL: {cache_ttl_secs}s</span>"));
    out.push_str(&format!("<span>Rendered: {}</span>", escape_html(&now_utc)));
    out.push_str("</div>");
    out.push_str("<form method=\"post\" action=\"/dashboard/refresh\" class=\"refresh-form\"><button type=\"submit\" class=\"refresh-btn\">Refresh data</button></form>");
    out.push_str("</section>\n");

    for block in &board.missing_blocks {
        out.push_str(&format!(
            "<div class=\"notice\">Section <b>{}</b> was not found in the sheet; its columns are shown as '-'.</div>\n",
            escape_html(block)
        ));
    }

    if board.is_empty() {
        out.push_str("<section class=\"card empty\"><h2>No data</h2><p>The configured range returned no asset rows.</p></section>\n");
    } else {
        out.push_str("<section class=\"card\"><h2>Overview</h2><div class=\"table-wrap\"><table id=\"overview-table\">\n");
        out.push_str("<thead><tr>");
        for header in OVERVIEW_HEADERS {
            out.push_str("<th>");
            out.push_str(&escape_html(header));
            out.push_str("</th>");
        }
        out.push_str("</tr></thead><tbody>\n");
        for (idx, record) in board.records.iter().enumerate() {
            out.push_str(&overview_row_html(idx, record));
        }
        out.push_str("</tbody></table></div></section>\n");

        if let Some(record) = select_asset(board, requested_asset) {
            out.push_str(&detail_html(board, record));
        }
    }

    out.push_str(&format!(
        "<p class=\"methodology\"><b>{}</b></p>",
        escape_html(METHODOLOGY_NOTE)
    ));
    out.push_str(&format!(
        "<p class=\"caption\">Data source: {} ({}), range {}</p>\n",
        escape_html(&board.source_kind),
        escape_html(&board.source_id),
        escape_html(&board.range)
    ));
    out.push_str("</main></body></html>\n");
    out
}

pub fn render_error_html(message: &str) -> String {
    let mut out = page_head("GEX Sentiment Dashboard - error");
    out.push_str("<section class=\"hero\"><h1>GEX Sentiment Dashboard</h1>");
    out.push_str("<form method=\"post\" action=\"/dashboard/refresh\" class=\"refresh-form\"><button type=\"submit\" class=\"refresh-btn\">Retry</button></form></section>\n");
    out.push_str("<section class=\"card error\"><h2>Data source error</h2><p>");
    out.push_str(&escape_html(message));
    out.push_str("</p></section>\n</main></body></html>\n");
    out
}

fn page_head(title: &str) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str(&format!("<title>{}</title>\n", escape_html(title)));
    out.push_str("<style>:root{--bg:#f3f5f7;--card:#ffffff;--ink:#182026;--muted:#5f6a73;--line:#d7dce1;--head:#1d2b36;--btn:#0c5f78}*{box-sizing:border-box}body{margin:0;color:var(--ink);font-family:\"Inter\",\"Segoe UI\",sans-serif;background:var(--bg);min-height:100vh}.shell{max-width:1300px;margin:0 auto;padding:24px 18px 28px}.hero{background:linear-gradient(135deg,#13212b 0%,#2a4657 100%);color:#f7fbfc;border-radius:14px;padding:18px 20px;display:flex;flex-wrap:wrap;align-items:center;gap:12px;justify-content:space-between}.hero h1{margin:0;font-size:1.5rem}.hero-meta{display:flex;gap:16px;flex-wrap:wrap;font-size:.9rem;color:#dcebf0}.refresh-btn{background:var(--btn);color:#fff;border:0;border-radius:9px;padding:8px 14px;font-weight:700;cursor:pointer}.card{margin-top:16px;background:var(--card);border:1px solid #cbd4db;border-radius:14px;padding:14px 16px;box-shadow:0 8px 22px rgba(26,35,42,.10)}.card h2{margin:0 0 10px;font-size:1.1rem}.table-wrap{overflow:auto}table{width:100%;border-collapse:collapse}thead th{background:var(--head);color:#f2f7f9;font-size:.78rem;text-transform:uppercase;letter-spacing:.04em;padding:9px 10px;text-align:left}tbody td{font-size:.86rem;padding:8px 10px;border-bottom:1px solid var(--line);white-space:nowrap}tbody tr:nth-child(even){background:#fafcfd}.pill{display:inline-block;color:#fff;border-radius:999px;padding:3px 10px;font-size:.76rem;font-weight:700}.derived{font-style:italic;opacity:.85}.detail{display:grid;grid-template-columns:1fr 2fr;gap:16px}.levels dt{color:var(--muted);font-size:.8rem}.levels dd{margin:0 0 8px;font-weight:700}.notice{margin-top:12px;padding:10px 14px;border-radius:10px;background:#fff5d6;border:1px solid #f0d98a}.error{border-color:#e0a3a3;background:#fff1f1}.empty p,.caption{color:var(--muted)}.methodology{margin-top:18px}@media (max-width:760px){.detail{grid-template-columns:1fr}.shell{padding:12px}}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");
    out
}

fn overview_row_html(idx: usize, record: &AssetRecord) -> String {
    let mut out = format!("<tr data-row=\"{idx}\">");
    out.push_str(&format!(
        "<td><a href=\"{}\">{}</a></td>",
        escape_html(&asset_href(&record.underlying)),
        escape_html(&record.underlying)
    ));
    for value in [
        record.spot,
        record.gamma_flip,
        record.put_wall,
        record.call_wall,
    ] {
        out.push_str("<td>");
        out.push_str(&format_level(value));
        out.push_str("</td>");
    }
    out.push_str(&format!(
        "<td>{}</td><td>{}</td><td>{}</td>",
        pill_html(record.regime.as_deref(), &REGIME_COLORS, record.regime_derived),
        pill_html(record.bias.as_deref(), &BIAS_COLORS, false),
        pill_html(record.recommendation.as_deref(), &RECOMMENDATION_COLORS, false)
    ));
    let score_class = if record.score_derived { " class=\"derived\"" } else { "" };
    out.push_str(&format!(
        "<td{score_class}>{}</td>",
        format_score(record.score)
    ));
    out.push_str("</tr>\n");
    out
}

fn detail_html(board: &AssetBoard, record: &AssetRecord) -> String {
    let mut out = String::from("<section class=\"card\"><h2>Asset Detail</h2>");
    out.push_str("<form method=\"get\" action=\"/dashboard\" id=\"asset-form\"><label>Select asset <select name=\"asset\" onchange=\"this.form.submit()\">");
    for candidate in &board.records {
        let selected = if candidate.underlying == record.underlying {
            " selected"
        } else {
            ""
        };
        out.push_str(&format!(
            "<option value=\"{0}\"{selected}>{0}</option>",
            escape_html(&candidate.underlying)
        ));
    }
    out.push_str("</select></label></form>\n");

    out.push_str("<div class=\"detail\"><div>");
    out.push_str(&format!(
        "<p class=\"badges\">{} {} {}</p>",
        pill_html(record.regime.as_deref(), &REGIME_COLORS, record.regime_derived),
        pill_html(record.bias.as_deref(), &BIAS_COLORS, false),
        pill_html(record.recommendation.as_deref(), &RECOMMENDATION_COLORS, false)
    ));
    out.push_str("<dl class=\"levels\">");
    for (label, value) in [
        ("Spot", record.spot),
        ("Gamma Flip", record.gamma_flip),
        ("Put Wall", record.put_wall),
        ("Call Wall", record.call_wall),
    ] {
        out.push_str(&format!("<dt>{label}</dt><dd>{}</dd>", format_level(value)));
    }
    out.push_str("</dl>");
    out.push_str(&score_gauge_svg(record.score));
    out.push_str("</div><div>");
    out.push_str(&levels_chart_svg(record));
    out.push_str("</div></div></section>\n");
    out
}

fn pill_html(label: Option<&str>, palette: &[(&str, &'static str)], derived: bool) -> String {
    let Some(label) = label else {
        return "-".to_string();
    };
    let class = if derived { "pill derived" } else { "pill" };
    format!(
        "<span class=\"{class}\" style=\"background:{}\">{}</span>",
        label_color(palette, label),
        escape_html(label)
    )
}

/// Half-circle gauge from -2 (left) to +2 (right) with a needle at `score`.
pub fn score_gauge_svg(score: Option<f64>) -> String {
    let mut out = String::from(
        "<svg class=\"gauge\" viewBox=\"0 0 200 120\" width=\"260\" height=\"156\" role=\"img\" aria-label=\"Score gauge\">",
    );
    let bands = [
        (-SCORE_BOUND, -0.5, "#e57373"),
        (-0.5, 0.5, "#cfd8dc"),
        (0.5, SCORE_BOUND, "#81c784"),
    ];
    for (from, to, color) in bands {
        out.push_str(&format!(
            "<path d=\"{}\" fill=\"none\" stroke=\"{color}\" stroke-width=\"18\"/>",
            gauge_arc_path(from, to, 80.0)
        ));
    }

    match score {
        Some(value) => {
            let angle = gauge_angle(value);
            let (x, y) = polar(angle, 68.0);
            out.push_str(&format!(
                "<line x1=\"100\" y1=\"100\" x2=\"{x:.1}\" y2=\"{y:.1}\" stroke=\"#182026\" stroke-width=\"3\"/>"
            ));
            out.push_str("<circle cx=\"100\" cy=\"100\" r=\"5\" fill=\"#182026\"/>");
            out.push_str(&format!(
                "<text x=\"100\" y=\"118\" text-anchor=\"middle\" font-size=\"14\" font-weight=\"700\">{}</text>",
                format_score(Some(value))
            ));
        }
        None => out.push_str(
            "<text x=\"100\" y=\"95\" text-anchor=\"middle\" font-size=\"13\">no score</text>",
        ),
    }
    out.push_str("<text x=\"14\" y=\"118\" font-size=\"10\">-2</text><text x=\"178\" y=\"118\" font-size=\"10\">+2</text>");
    out.push_str("</svg>");
    out
}

fn gauge_angle(score: f64) -> f64 {
    let clamped = score.clamp(-SCORE_BOUND, SCORE_BOUND);
    PI * (1.0 - (clamped + SCORE_BOUND) / (2.0 * SCORE_BOUND))
}

fn polar(angle: f64, radius: f64) -> (f64, f64) {
    (100.0 + radius * angle.cos(), 100.0 - radius * angle.sin())
}

fn gauge_arc_path(from: f64, to: f64, radius: f64) -> String {
    let (x1, y1) = polar(gauge_angle(from), radius);
    let (x2, y2) = polar(gauge_angle(to), radius);
    format!("M {x1:.1} {y1:.1} A {radius:.0} {radius:.0} 0 0 1 {x2:.1} {y2:.1}")
}

/// Horizontal price axis with the put wall, flip, spot and call wall marked.
pub fn levels_chart_svg(record: &AssetRecord) -> String {
    let levels: Vec<(&str, f64, &str)> = [
        ("Put Wall", record.put_wall, "#c62828"),
        ("Gamma Flip", record.gamma_flip, "#f9a825"),
        ("Spot", record.spot, "#1565c0"),
        ("Call Wall", record.call_wall, "#2e7d32"),
    ]
    .into_iter()
    .filter_map(|(label, value, color)| value.map(|v| (label, v, color)))
    .collect();

    if levels.is_empty() {
        return "<p class=\"levels-empty\">No level data for this asset.</p>".to_string();
    }

    let min = levels.iter().map(|(_, v, _)| *v).fold(f64::INFINITY, f64::min);
    let max = levels
        .iter()
        .map(|(_, v, _)| *v)
        .fold(f64::NEG_INFINITY, f64::max);
    let pad = ((max - min) * 0.08).max(max.abs() * 0.005).max(1e-9);
    let (lo, hi) = (min - pad, max + pad);
    let x_of = |value: f64| 40.0 + (value - lo) / (hi - lo) * 520.0;

    let mut out = format!(
        "<svg class=\"levels-chart\" viewBox=\"0 0 600 {}\" width=\"100%\" role=\"img\" aria-label=\"Price levels for {}\">",
        60 + levels.len() * 34,
        escape_html(&record.underlying)
    );
    out.push_str("<line x1=\"40\" y1=\"30\" x2=\"560\" y2=\"30\" stroke=\"#90a4ae\" stroke-width=\"2\"/>");
    out.push_str(&format!(
        "<text x=\"40\" y=\"20\" font-size=\"11\">{}</text><text x=\"560\" y=\"20\" font-size=\"11\" text-anchor=\"end\">{}</text>",
        format_level(Some(lo)),
        format_level(Some(hi))
    ));

    for (idx, (label, value, color)) in levels.iter().enumerate() {
        let x = x_of(*value);
        let y = 60 + idx * 34;
        out.push_str(&format!(
            "<line x1=\"{x:.1}\" y1=\"30\" x2=\"{x:.1}\" y2=\"{y}\" stroke=\"{color}\" stroke-width=\"2\" stroke-dasharray=\"4 3\"/>"
        ));
        out.push_str(&format!(
            "<circle cx=\"{x:.1}\" cy=\"30\" r=\"6\" fill=\"{color}\"/><rect x=\"{:.1}\" y=\"{}\" width=\"118\" height=\"22\" rx=\"6\" fill=\"{color}\"/>",
            (x - 59.0).clamp(0.0, 482.0),
            y - 4
        ));
        out.push_str(&format!(
            "<text x=\"{:.1}\" y=\"{}\" font-size=\"11\" fill=\"#fff\" text-anchor=\"middle\">{label} {}</text>",
            (x - 59.0).clamp(0.0, 482.0) + 59.0,
            y + 11,
            format_level(Some(*value))
        ));
    }
    out.push_str("</svg>");
    out
}

pub fn format_level(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => "-".to_string(),
    }
}

pub fn format_score(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:+.2}"),
        None => "-".to_string(),
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Relative link to an asset's detail view, form-encoded so names like
/// `S&P 500` survive the round trip through `Query`.
fn asset_href(underlying: &str) -> String {
    let Ok(mut url) = Url::parse("http://localhost/dashboard") else {
        return "/dashboard".to_string();
    };
    url.query_pairs_mut().append_pair("asset", underlying);
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}

#[derive(Clone)]
struct DashboardAppState {
    service: Arc<BoardService>,
}

enum DashboardError {
    Source(SourceError),
    Worker(String),
}

impl DashboardError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Source(_) => StatusCode::BAD_GATEWAY,
            Self::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Source(err) if err.is_auth() => {
                format!("The spreadsheet rejected our credentials: {err}")
            }
            Self::Source(err) => err.to_string(),
            Self::Worker(message) => message.clone(),
        }
    }
}

async fn run_pipeline(
    service: Arc<BoardService>,
    refresh: bool,
) -> Result<Arc<AssetBoard>, DashboardError> {
    let joined = tokio::task::spawn_blocking(move || {
        if refresh {
            service.refresh()
        } else {
            service.load()
        }
    })
    .await;

    match joined {
        Ok(Ok(board)) => Ok(board),
        Ok(Err(err)) => {
            warn!(
                component = "dashboard_server",
                event = "http.pipeline.error",
                auth = err.is_auth(),
                error = %err
            );
            Err(DashboardError::Source(err))
        }
        Err(err) => Err(DashboardError::Worker(format!("pipeline task failed: {err}"))),
    }
}

fn cache_ttl_secs(state: &DashboardAppState) -> u64 {
    state.service.cache_ttl().as_secs()
}

async fn get_dashboard_html(
    State(state): State<DashboardAppState>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    info!(
        component = "dashboard_server",
        event = "http.dashboard.request",
        asset = query.asset.as_deref().unwrap_or("")
    );

    match run_pipeline(Arc::clone(&state.service), false).await {
        Ok(board) => Html(render_dashboard_html(
            &board,
            query.asset.as_deref(),
            cache_ttl_secs(&state),
        ))
        .into_response(),
        Err(err) => (err.status(), Html(render_error_html(&err.message()))).into_response(),
    }
}

async fn get_dashboard_snapshot(State(state): State<DashboardAppState>) -> Response {
    info!(
        component = "dashboard_server",
        event = "http.snapshot.request"
    );

    match run_pipeline(Arc::clone(&state.service), false).await {
        Ok(board) => Json(SnapshotBody::from_board(&board, cache_ttl_secs(&state))).into_response(),
        Err(err) => (err.status(), Json(json!({ "error": err.message() }))).into_response(),
    }
}

async fn post_dashboard_refresh(State(state): State<DashboardAppState>) -> Response {
    info!(
        component = "dashboard_server",
        event = "http.refresh.request"
    );

    match run_pipeline(Arc::clone(&state.service), true).await {
        Ok(_) => Redirect::to("/dashboard").into_response(),
        Err(err) => (err.status(), Html(render_error_html(&err.message()))).into_response(),
    }
}
