//! VRRP server binary

use anyhow::Context;
use vrrp_server::{Config, VrrpServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (needed for logging settings)
    let config = match Config::load() {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            eprintln!("Using default configuration");
            None
        }
    };

    let logging = config.as_ref().map(|cfg| cfg.logging.clone()).unwrap_or_default();
    let level = logging.level.as_deref().unwrap_or("info");
    match logging.format.as_deref() {
        Some("json") => common::logging::init_json(level),
        _ => common::logging::init(level),
    }

    tracing::info!("VRRP server starting");

    let server_config = config
        .map(|cfg| {
            tracing::info!("Configuration loaded successfully");
            cfg.to_server_config()
        })
        .unwrap_or_else(|| {
            tracing::warn!("Using default configuration");
            vrrp_server::ServerConfig::default()
        });

    VrrpServer::new(server_config)
        .run()
        .await
        .context("VRRP server failed")?;

    Ok(())
}
