//! Pet Classifier - Main Entry Point

use anyhow::Context;
use api::{init_logging, run_server, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    init_logging(&settings.logging).context("failed to initialize logging")?;

    info!("=== Pet Classifier v{} ===", env!("CARGO_PKG_VERSION"));

    run_server(settings).await.context("pet classifier server stopped")?;

    Ok(())
}
