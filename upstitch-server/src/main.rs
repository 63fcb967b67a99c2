//! upstitch server binary

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;
use upstitch_engine::UploadAssembler;
use upstitch_server::{ServerConfig, UploadServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_matches(&ServerConfig::command().get_matches())?;

    init_tracing(config.json_logs);

    info!("Starting upstitch server");
    info!("Upload directory: {}", config.upload_dir.display());
    info!("Temp directory: {}", config.temp_dir.display());
    info!("Bind address: {}", config.bind);

    let assembler = UploadAssembler::new(config.upload_config())
        .context("Failed to prepare upload directories")?;

    UploadServer::new(assembler, config.upload_path.clone())
        .serve(config.bind)
        .await
        .context("Server error")?;

    info!("Server shutdown gracefully");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
