//! Grid sources: the hosted spreadsheet, a CSV export of it, and an
//! in-memory sheet for demos and tests.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use reqwest::{StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::grid::{CellRange, CellRef, RawGrid};

pub const GOOGLE_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("access to {url} was rejected with HTTP {status}")]
    Auth { url: String, status: u16 },
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("invalid source URL '{0}'")]
    InvalidUrl(String),
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl SourceError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Anything that can hand back the cells of one or more sheet ranges.
pub trait GridSource: Send + Sync + 'static {
    /// Stable identity used in cache keys.
    fn source_id(&self) -> String;

    /// Short label for logs and the page caption.
    fn kind(&self) -> &'static str;

    /// One grid per requested range, in request order. Each grid's origin is
    /// the top-left cell of its range.
    fn fetch_ranges(&self, ranges: &[CellRange]) -> Result<Vec<RawGrid>, SourceError>;

    fn fetch_range(&self, range: &CellRange) -> Result<RawGrid, SourceError> {
        let mut grids = self.fetch_ranges(std::slice::from_ref(range))?;
        Ok(grids.pop().unwrap_or_default())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum SheetCredential {
    ApiKey(String),
    BearerToken(String),
}

impl fmt::Debug for SheetCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::BearerToken(_) => f.write_str("BearerToken(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleSheetsConfig {
    pub spreadsheet_id: String,
    pub worksheet: String,
    pub credential: SheetCredential,
    pub base_url: String,
    pub http_timeout_ms: u64,
}

impl GoogleSheetsConfig {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        worksheet: impl Into<String>,
        credential: SheetCredential,
    ) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: worksheet.into(),
            credential,
            base_url: GOOGLE_SHEETS_BASE_URL.to_string(),
            http_timeout_ms: 10_000,
        }
    }
}

trait HttpFetcher: Send + Sync {
    fn get_bytes(&self, url: &Url, bearer: Option<&str>) -> Result<Vec<u8>, SourceError>;
}

struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    fn new(timeout_ms: u64) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| SourceError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_bytes(&self, url: &Url, bearer: Option<&str>) -> Result<Vec<u8>, SourceError> {
        let shown = redacted_url(url);
        let mut request = self.client.get(url.clone());
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|err| SourceError::HttpRequest {
            url: shown.clone(),
            message: err.without_url().to_string(),
        })?;

        check_status(response.status(), &shown)?;

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| SourceError::HttpRequest {
                url: shown,
                message: err.without_url().to_string(),
            })
    }
}

/// 401 and 403 are credential rejections; any other non-2xx is a failed
/// request.
fn check_status(status: StatusCode, url: &str) -> Result<(), SourceError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SourceError::Auth {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        return Err(SourceError::HttpRequest {
            url: url.to_string(),
            message: format!("unexpected HTTP status {status}"),
        });
    }
    Ok(())
}

/// Reads ranges through the Sheets `values:batchGet` endpoint.
pub struct GoogleSheetsSource {
    cfg: GoogleSheetsConfig,
    fetcher: Box<dyn HttpFetcher>,
}

impl GoogleSheetsSource {
    pub fn new(cfg: GoogleSheetsConfig) -> Result<Self, SourceError> {
        let fetcher = ReqwestBlockingFetcher::new(cfg.http_timeout_ms)?;
        Ok(Self {
            cfg,
            fetcher: Box::new(fetcher),
        })
    }

    /// Unqualified ranges are pinned to the configured worksheet.
    fn qualify(&self, range: &CellRange) -> CellRange {
        match range.sheet {
            Some(_) => range.clone(),
            None => range.clone().on_sheet(self.cfg.worksheet.clone()),
        }
    }

    fn batch_url(&self, ranges: &[CellRange]) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.cfg.base_url)
            .map_err(|_| SourceError::InvalidUrl(self.cfg.base_url.clone()))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.cfg.base_url.clone()))?
            .push(&self.cfg.spreadsheet_id)
            .push("values:batchGet");

        {
            let mut query = url.query_pairs_mut();
            for range in ranges {
                query.append_pair("ranges", &range.to_a1());
            }
            query.append_pair("majorDimension", "ROWS");
            query.append_pair("valueRenderOption", "FORMATTED_VALUE");
            if let SheetCredential::ApiKey(key) = &self.cfg.credential {
                query.append_pair("key", key);
            }
        }

        Ok(url)
    }
}

impl GridSource for GoogleSheetsSource {
    fn source_id(&self) -> String {
        format!(
            "google-sheets:{}:{}",
            self.cfg.spreadsheet_id, self.cfg.worksheet
        )
    }

    fn kind(&self) -> &'static str {
        "google_sheets"
    }

    fn fetch_ranges(&self, ranges: &[CellRange]) -> Result<Vec<RawGrid>, SourceError> {
        let qualified: Vec<CellRange> = ranges.iter().map(|range| self.qualify(range)).collect();
        let url = self.batch_url(&qualified)?;
        let bearer = match &self.cfg.credential {
            SheetCredential::BearerToken(token) => Some(token.as_str()),
            SheetCredential::ApiKey(_) => None,
        };

        info!(
            component = "sheets",
            event = "sheets.fetch.start",
            source = %self.source_id(),
            range_count = qualified.len()
        );
        let payload = self.fetcher.get_bytes(&url, bearer).map_err(|err| {
            warn!(
                component = "sheets",
                event = "sheets.fetch.error",
                auth = err.is_auth(),
                error = %err
            );
            err
        })?;

        let grids = decode_batch(&redacted_url(&url), &payload, &qualified)?;
        debug!(
            component = "sheets",
            event = "sheets.fetch.done",
            rows = grids.iter().map(RawGrid::len).sum::<usize>(),
            bytes = payload.len()
        );
        Ok(grids)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    value_ranges: Vec<ValueRange>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

fn decode_batch(
    url: &str,
    payload: &[u8],
    ranges: &[CellRange],
) -> Result<Vec<RawGrid>, SourceError> {
    let parsed: BatchGetResponse =
        serde_json::from_slice(payload).map_err(|err| SourceError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })?;

    if parsed.value_ranges.len() != ranges.len() {
        return Err(SourceError::Decode {
            url: url.to_string(),
            message: format!(
                "expected {} value ranges, got {}",
                ranges.len(),
                parsed.value_ranges.len()
            ),
        });
    }

    Ok(parsed
        .value_ranges
        .into_iter()
        .zip(ranges)
        .map(|(value_range, range)| {
            let rows = value_range
                .values
                .into_iter()
                .map(|row| row.into_iter().map(json_cell_text).collect())
                .collect();
            RawGrid::new(rows).with_origin(range.start)
        })
        .collect())
}

fn json_cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn redacted_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// A CSV export of the worksheet, read fresh on every fetch. Row 1 of the
/// file is sheet row 1; no header handling is applied.
#[derive(Debug, Clone)]
pub struct CsvGridSource {
    path: PathBuf,
}

impl CsvGridSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_sheet(&self) -> Result<RawGrid, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(RawGrid::new(rows))
    }
}

impl GridSource for CsvGridSource {
    fn source_id(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    fn kind(&self) -> &'static str {
        "csv"
    }

    fn fetch_ranges(&self, ranges: &[CellRange]) -> Result<Vec<RawGrid>, SourceError> {
        let sheet = self.read_sheet()?;
        debug!(
            component = "csv_source",
            event = "csv.read",
            path = %self.path.display(),
            rows = sheet.len()
        );
        Ok(ranges.iter().map(|range| crop(&sheet, range)).collect())
    }
}

/// Whole sheet held in memory. Counts fetches so callers can observe caching.
#[derive(Clone)]
pub struct InMemoryGridSource {
    id: String,
    sheet: Arc<RwLock<RawGrid>>,
    fetches: Arc<AtomicUsize>,
}

impl InMemoryGridSource {
    pub fn new(id: impl Into<String>, sheet: RawGrid) -> Self {
        Self {
            id: id.into(),
            sheet: Arc::new(RwLock::new(sheet)),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn demo() -> Self {
        Self::new("demo", demo_sheet())
    }

    pub fn replace_sheet(&self, sheet: RawGrid) {
        let mut guard = self
            .sheet
            .write()
            .expect("in-memory sheet lock should not be poisoned");
        *guard = sheet;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl GridSource for InMemoryGridSource {
    fn source_id(&self) -> String {
        format!("memory:{}", self.id)
    }

    fn kind(&self) -> &'static str {
        "in_memory"
    }

    fn fetch_ranges(&self, ranges: &[CellRange]) -> Result<Vec<RawGrid>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let sheet = self
            .sheet
            .read()
            .expect("in-memory sheet lock should not be poisoned");
        Ok(ranges.iter().map(|range| crop(&sheet, range)).collect())
    }
}

/// Cuts `range` out of a full sheet the way the Sheets API returns it:
/// trailing empty cells and trailing empty rows are omitted.
pub fn crop(sheet: &RawGrid, range: &CellRange) -> RawGrid {
    let origin = range.start;
    let Some((first_row, last_row, first_col, col_count)) = sheet.relative_bounds(range) else {
        return RawGrid::default().with_origin(origin);
    };

    let mut rows: Vec<Vec<String>> = (first_row..=last_row)
        .map(|row| {
            let mut cells: Vec<String> = (first_col..first_col + col_count)
                .map(|col| sheet.cell(row, col).to_string())
                .collect();
            while cells.last().is_some_and(|cell| cell.is_empty()) {
                cells.pop();
            }
            cells
        })
        .collect();
    while rows.last().is_some_and(Vec::is_empty) {
        rows.pop();
    }

    RawGrid::new(rows).with_origin(CellRef::new(origin.row, origin.col))
}

/// Sample worksheet with the production layout: an overview block, the GEX
/// levels block, and two trailing sections that are never read.
pub fn demo_sheet() -> RawGrid {
    RawGrid::from_cells(vec![
        vec!["Overview"],
        vec!["Underlying", "Regime", "Bias", "Recommendation", "Score"],
        vec!["SPX", "Positive Gamma", "Bullish", "Buy Dips", "1,25"],
        vec!["NDX", "Positive Gamma", "Neutral", "Hold", "0,40"],
        vec!["RUT", "Negative Gamma", "Bearish", "Hedge", "-1,10"],
        vec!["GLD", "", "Bullish", "Buy", ""],
        vec!["USO", "Negative Gamma", "Bearish", "Sell Rallies", "-1,80"],
        vec![],
        vec!["GEX Data"],
        vec!["Underlying", "Spot", "Gamma Flip", "Put Wall", "Call Wall"],
        vec!["SPX", "5850,25", "5780", "5700", "5950"],
        vec!["NDX", "20510,8", "20400", "20000", "21000"],
        vec!["RUT", "2185,4", "2230", "2150", "2300"],
        vec!["GLD", "242,15", "238", "230", "250"],
        vec!["USO", "71,3", "74,5", "70", "80"],
        vec![],
        vec!["COT DATA"],
        vec!["Underlying", "Commercials Net", "Large Specs Net"],
        vec!["SPX", "-12500", "8300"],
        vec![],
        vec!["Retail Positioning"],
        vec!["Underlying", "Long %", "Short %"],
        vec!["SPX", "38%", "62%"],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockFetcher {
        responses: HashMap<String, Result<Vec<u8>, u16>>,
        seen: Arc<Mutex<Vec<(String, Option<String>)>>>,
    }

    impl MockFetcher {
        fn with(mut self, path: &str, body: &str) -> Self {
            self.responses
                .insert(path.to_string(), Ok(body.as_bytes().to_vec()));
            self
        }

        fn with_status(mut self, path: &str, status: u16) -> Self {
            self.responses.insert(path.to_string(), Err(status));
            self
        }
    }

    impl HttpFetcher for MockFetcher {
        fn get_bytes(&self, url: &Url, bearer: Option<&str>) -> Result<Vec<u8>, SourceError> {
            self.seen
                .lock()
                .unwrap()
                .push((url.to_string(), bearer.map(str::to_string)));
            match self.responses.get(url.path()) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(SourceError::Auth {
                    url: redacted_url(url),
                    status: *status,
                }),
                None => Err(SourceError::HttpRequest {
                    url: redacted_url(url),
                    message: "missing mock response".to_string(),
                }),
            }
        }
    }

    const BATCH_PATH: &str = "/v4/spreadsheets/doc123/values:batchGet";

    fn source(credential: SheetCredential, fetcher: MockFetcher) -> GoogleSheetsSource {
        GoogleSheetsSource {
            cfg: GoogleSheetsConfig::new("doc123", "Sentiment Tab", credential),
            fetcher: Box::new(fetcher),
        }
    }

    #[test]
    fn batch_url_qualifies_ranges_and_carries_api_key() {
        let src = source(
            SheetCredential::ApiKey("secret".to_string()),
            MockFetcher::default(),
        );
        let ranges = vec![src.qualify(&CellRange::parse("A1:I60").unwrap())];
        let url = src.batch_url(&ranges).unwrap();

        assert_eq!(url.path(), BATCH_PATH);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("ranges".to_string(), "'Sentiment Tab'!A1:I60".to_string())));
        assert!(pairs.contains(&("key".to_string(), "secret".to_string())));
        assert!(!redacted_url(&url).contains("secret"));
    }

    #[test]
    fn decodes_value_ranges_with_mixed_cell_types() {
        let body = r#"{"spreadsheetId":"doc123","valueRanges":[
            {"range":"'Sentiment Tab'!B2:D4","majorDimension":"ROWS",
             "values":[["Underlying","Spot"],["AAA",10.5,true],[]]},
            {"range":"'Sentiment Tab'!F1:F2"}
        ]}"#;
        let src = source(
            SheetCredential::BearerToken("tok".to_string()),
            MockFetcher::default().with(BATCH_PATH, body),
        );

        let grids = src
            .fetch_ranges(&[
                CellRange::parse("B2:D4").unwrap(),
                CellRange::parse("F1:F2").unwrap(),
            ])
            .unwrap();

        assert_eq!(grids.len(), 2);
        assert_eq!(grids[0].origin, CellRef::new(1, 1));
        assert_eq!(grids[0].rows[1], vec!["AAA", "10.5", "true"]);
        assert!(grids[1].is_empty());
    }

    #[test]
    fn bearer_token_is_sent_as_header_not_query() {
        let fetcher = MockFetcher::default().with(BATCH_PATH, r#"{"valueRanges":[{}]}"#);
        let seen = Arc::clone(&fetcher.seen);
        let src = GoogleSheetsSource {
            cfg: GoogleSheetsConfig::new(
                "doc123",
                "Sentiment Tab",
                SheetCredential::BearerToken("tok".to_string()),
            ),
            fetcher: Box::new(fetcher),
        };
        let url = src
            .batch_url(&[src.qualify(&CellRange::parse("A1:B2").unwrap())])
            .unwrap();
        assert!(url.query_pairs().all(|(key, _)| key != "key"));

        let grid = src.fetch_range(&CellRange::parse("A1:B2").unwrap()).unwrap();
        assert!(grid.is_empty());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1.as_deref(), Some("tok"));
        assert!(!seen[0].0.contains("tok"));
    }

    #[test]
    fn auth_rejection_is_reported_as_auth_error() {
        let src = source(
            SheetCredential::ApiKey("bad".to_string()),
            MockFetcher::default().with_status(BATCH_PATH, 403),
        );
        let err = src
            .fetch_range(&CellRange::parse("A1:B2").unwrap())
            .unwrap_err();
        assert!(err.is_auth());
        assert!(!err.to_string().contains("bad"));
    }

    #[test]
    fn rejected_statuses_map_to_auth_and_others_to_request_errors() {
        let url = "https://sheets.googleapis.com/v4/spreadsheets/doc123/values:batchGet";

        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = check_status(status, url).unwrap_err();
            assert!(err.is_auth(), "{status} should be an auth error");
            assert!(matches!(err, SourceError::Auth { status: code, .. } if code == status.as_u16()));
        }

        let err = check_status(StatusCode::INTERNAL_SERVER_ERROR, url).unwrap_err();
        assert!(!err.is_auth());
        assert!(matches!(err, SourceError::HttpRequest { .. }));
        assert!(err.to_string().contains("500"));

        assert!(check_status(StatusCode::OK, url).is_ok());
    }

    #[test]
    fn mismatched_range_count_is_a_decode_error() {
        let src = source(
            SheetCredential::ApiKey("k".to_string()),
            MockFetcher::default().with(BATCH_PATH, r#"{"valueRanges":[]}"#),
        );
        let err = src
            .fetch_range(&CellRange::parse("A1:B2").unwrap())
            .unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[test]
    fn credential_debug_output_is_redacted() {
        let shown = format!("{:?}", SheetCredential::ApiKey("secret".to_string()));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn crop_trims_trailing_blanks_like_the_api() {
        let sheet = RawGrid::from_cells(vec![
            vec!["a", "b", "", ""],
            vec!["c", "", "", "z"],
            vec!["", "", "", ""],
        ]);
        let grid = crop(&sheet, &CellRange::parse("A1:C3").unwrap());
        assert_eq!(grid.rows, vec![vec!["a", "b"], vec!["c"]]);

        let outside = crop(&sheet, &CellRange::parse("A10:C12").unwrap());
        assert!(outside.is_empty());
        assert_eq!(outside.origin, CellRef::new(9, 0));
    }

    #[test]
    fn in_memory_source_counts_fetches() {
        let src = InMemoryGridSource::demo();
        let range = CellRange::parse("A1:E30").unwrap();
        let grid = src.fetch_range(&range).unwrap();
        assert_eq!(grid.cell(1, 0), "Underlying");
        assert_eq!(src.fetch_count(), 1);
    }
}
