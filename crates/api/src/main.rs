//! Telemetry Guard - Main Entry Point
//!
//! Usage: `telemetry-guard [config-file]`. Every setting can be overridden
//! with `TGUARD__SECTION__KEY` environment variables.

use anyhow::Context;
use api::{
    build_collaborators, create_governor_config, init_logging, install_metrics,
    register_default_handlers, run_server, AppState, ServiceConfig,
};
use router::{spawn_maintenance, EventRouter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ServiceConfig::load(config_path.as_deref()).context("loading configuration")?;

    init_logging(&config.logging).context("installing tracing subscriber")?;

    info!("=== Telemetry Guard v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = install_metrics().context("installing Prometheus recorder")?;
    let governor = create_governor_config(&config.rate_limit)?;

    let collaborators = build_collaborators(&config.core);
    let router = Arc::new(EventRouter::new(config.core.clone(), collaborators)?);
    register_default_handlers(&router);
    let maintenance = spawn_maintenance(&router);

    let state = Arc::new(AppState::new(router, Some(metrics)));
    run_server(&config.http.bind, state, governor).await?;

    maintenance.abort();
    Ok(())
}
