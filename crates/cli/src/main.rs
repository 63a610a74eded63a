//! Edge Bench - Main Entry Point

use cli::{init_logging, run, AppConfig, DEFAULT_CONFIG_PATH};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&config_path)?;
    init_logging(&config.logging)?;

    info!("=== Edge Bench v{} ===", env!("CARGO_PKG_VERSION"));

    let report = run(config).await?;
    println!("{}", report.to_json()?);

    Ok(())
}
