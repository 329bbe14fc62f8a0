//! Environment-driven configuration for the dashboard server.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::board::SheetLayout;
use crate::grid::{CellRange, RangeError};
use crate::observability::{LogFormat, LoggingConfig};
use crate::source::{
    CsvGridSource, GoogleSheetsConfig, GoogleSheetsSource, GridSource, InMemoryGridSource,
    SheetCredential, SourceError,
};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_SHEET_TAB: &str = "Sentiment";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: &'static str, message: String },
    #[error("invalid sheet range: {0}")]
    Range(#[from] RangeError),
    #[error("GEXDASH_SHEET_ID is set but neither GEXDASH_API_KEY nor GEXDASH_ACCESS_TOKEN is")]
    MissingCredential,
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    Demo { reason: &'static str },
    Csv { path: PathBuf },
    GoogleSheets(GoogleSheetsConfig),
}

impl SourceSelection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Demo { .. } => "demo",
            Self::Csv { .. } => "csv",
            Self::GoogleSheets(_) => "google_sheets",
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Demo { reason } => Some(*reason),
            Self::Csv { .. } => Some("GEXDASH_CSV_PATH"),
            Self::GoogleSheets(_) => None,
        }
    }

    pub fn build(&self) -> Result<Arc<dyn GridSource>, ConfigError> {
        let source: Arc<dyn GridSource> = match self {
            Self::Demo { .. } => Arc::new(InMemoryGridSource::demo()),
            Self::Csv { path } => Arc::new(CsvGridSource::new(path.clone())),
            Self::GoogleSheets(cfg) => Arc::new(GoogleSheetsSource::new(cfg.clone())?),
        };
        Ok(source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub bind_addr: SocketAddr,
    pub cache_ttl_secs: u64,
    pub layout: SheetLayout,
    pub source: SourceSelection,
    pub logging: LoggingConfig,
}

impl DashboardConfig {
    /// Reads every `GEXDASH_*` variable. Source precedence: forced demo,
    /// then a spreadsheet id, then a CSV path, then the demo sheet.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = non_empty_var("GEXDASH_DASHBOARD_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|err| ConfigError::InvalidValue {
                var: "GEXDASH_DASHBOARD_ADDR",
                message: err.to_string(),
            })?;

        let cache_ttl_secs = match non_empty_var("GEXDASH_CACHE_TTL_SECS") {
            Some(raw) => parse_u64("GEXDASH_CACHE_TTL_SECS", &raw)?,
            None => DEFAULT_CACHE_TTL_SECS,
        };

        let mut layout = SheetLayout::default();
        if let Some(raw) = non_empty_var("GEXDASH_SHEET_RANGE") {
            layout.range = CellRange::parse(&raw)?;
        }

        let source = source_selection_from_env()?;
        let logging = logging_from_env()?;

        Ok(Self {
            bind_addr,
            cache_ttl_secs,
            layout,
            source,
            logging,
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn source_selection_from_env() -> Result<SourceSelection, ConfigError> {
    let force_demo = non_empty_var("GEXDASH_USE_DEMO")
        .and_then(|raw| parse_bool(&raw))
        .unwrap_or(false);
    if force_demo {
        return Ok(SourceSelection::Demo {
            reason: "GEXDASH_USE_DEMO",
        });
    }

    if let Some(spreadsheet_id) = non_empty_var("GEXDASH_SHEET_ID") {
        let credential = match (
            non_empty_var("GEXDASH_ACCESS_TOKEN"),
            non_empty_var("GEXDASH_API_KEY"),
        ) {
            (Some(token), _) => SheetCredential::BearerToken(token),
            (None, Some(key)) => SheetCredential::ApiKey(key),
            (None, None) => return Err(ConfigError::MissingCredential),
        };
        let worksheet =
            non_empty_var("GEXDASH_SHEET_TAB").unwrap_or_else(|| DEFAULT_SHEET_TAB.to_string());

        let mut cfg = GoogleSheetsConfig::new(spreadsheet_id, worksheet, credential);
        if let Some(raw) = non_empty_var("GEXDASH_HTTP_TIMEOUT_MS") {
            cfg.http_timeout_ms = parse_u64("GEXDASH_HTTP_TIMEOUT_MS", &raw)?;
        }
        return Ok(SourceSelection::GoogleSheets(cfg));
    }

    if let Some(path) = non_empty_var("GEXDASH_CSV_PATH") {
        return Ok(SourceSelection::Csv {
            path: PathBuf::from(path),
        });
    }

    Ok(SourceSelection::Demo {
        reason: "no_sheet_configured",
    })
}

fn logging_from_env() -> Result<LoggingConfig, ConfigError> {
    let mut logging = LoggingConfig::default();
    if let Some(level) = non_empty_var("GEXDASH_LOG_LEVEL") {
        EnvFilter::try_new(&level).map_err(|err| ConfigError::InvalidValue {
            var: "GEXDASH_LOG_LEVEL",
            message: err.to_string(),
        })?;
        logging.level = level;
    }
    if let Some(raw) = non_empty_var("GEXDASH_LOG_FORMAT") {
        logging.format = LogFormat::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
            var: "GEXDASH_LOG_FORMAT",
            message: format!("expected json or pretty, got {raw:?}"),
        })?;
    }
    Ok(logging)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_u64(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|err| ConfigError::InvalidValue {
        var,
        message: err.to_string(),
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
