use std::io;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use gexdash::{
    dashboard_router, log_app_bind, log_app_start, log_source_selected, BoardService,
    DashboardConfig, InMemoryGridSource, LogFormat, LoggingConfig, RawGrid, SheetLayout,
    SourceSelection, SystemClock,
};
use tower::util::ServiceExt;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn service(source: InMemoryGridSource) -> BoardService {
    BoardService::new(
        Arc::new(source),
        SheetLayout::default(),
        Duration::from_secs(300),
        Arc::new(SystemClock),
    )
}

#[test]
fn server_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        let cfg = DashboardConfig {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            cache_ttl_secs: 300,
            layout: SheetLayout::default(),
            source: SourceSelection::Demo {
                reason: "GEXDASH_USE_DEMO",
            },
            logging: LoggingConfig {
                level: "gexdash=debug".to_string(),
                format: LogFormat::Json,
            },
        };
        log_app_start(&cfg);
        log_source_selected(&cfg);
        log_app_bind(cfg.bind_addr);
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"log_format\":\"json\""));
    assert!(logs.contains("\"event\":\"source.selected\""));
    assert!(logs.contains("\"reason\":\"GEXDASH_USE_DEMO\""));
    assert!(logs.contains("\"cache_ttl_secs\":300"));
    assert!(logs.contains("\"event\":\"app.bind\""));
}

#[test]
fn pipeline_logs_cache_miss_hit_and_completion() {
    let logs = capture_logs(Level::DEBUG, || {
        let service = service(InMemoryGridSource::demo());
        service.load().expect("demo load should succeed");
        service.load().expect("cached load should succeed");
        service.refresh().expect("refresh should succeed");
    });

    assert!(logs.contains("\"event\":\"cache.miss\""));
    assert!(logs.contains("\"event\":\"cache.hit\""));
    assert!(logs.contains("\"event\":\"cache.invalidate\""));
    assert_eq!(logs.matches("\"event\":\"pipeline.complete\"").count(), 2);
}

#[test]
fn missing_block_is_logged_as_warning() {
    let logs = capture_logs(Level::WARN, || {
        let source = InMemoryGridSource::new(
            "overview-only",
            RawGrid::from_cells(vec![vec!["Underlying", "Bias"], vec!["AAA", "Long"]]),
        );
        let board = service(source).load().expect("load should succeed");
        assert_eq!(board.missing_blocks, vec!["levels".to_string()]);
    });

    assert!(logs.contains("\"event\":\"pipeline.block.missing\""));
    assert!(logs.contains("\"block\":\"levels\""));
    assert!(!logs.contains("pipeline.complete"));
}

#[test]
fn http_routes_emit_request_events() {
    let logs = capture_logs(Level::INFO, || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("single-thread runtime should build");

        rt.block_on(async {
            let app = dashboard_router(Arc::new(service(InMemoryGridSource::demo())));

            for (method, uri) in [
                ("GET", "/dashboard"),
                ("GET", "/dashboard/snapshot"),
                ("POST", "/dashboard/refresh"),
            ] {
                let response = app
                    .clone()
                    .oneshot(
                        Request::builder()
                            .method(method)
                            .uri(uri)
                            .body(Body::empty())
                            .expect("request should build"),
                    )
                    .await
                    .expect("request should succeed");

                assert_ne!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            }
        });
    });

    assert!(logs.contains("\"event\":\"http.dashboard.request\""));
    assert!(logs.contains("\"event\":\"http.snapshot.request\""));
    assert!(logs.contains("\"event\":\"http.refresh.request\""));
}
