use std::sync::Arc;

use gexdash::{
    dashboard_router, init_logging, log_app_bind, log_app_start, log_source_selected,
    BoardService, DashboardConfig, SystemClock,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = DashboardConfig::from_env()?;
    init_logging(&cfg.logging)?;
    log_app_start(&cfg);

    let source = cfg.source.build()?;
    log_source_selected(&cfg);

    let service = Arc::new(BoardService::new(
        source,
        cfg.layout.clone(),
        cfg.cache_ttl(),
        Arc::new(SystemClock),
    ));
    let app = dashboard_router(service);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
