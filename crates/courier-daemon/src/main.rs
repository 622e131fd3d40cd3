use std::env;
use std::path::Path;
use std::sync::Arc;

use courier_core::db::MemoryDriver;
use courier_core::push::FcmClient;
use courier_core::{LogAlertSink, PushService, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = env::var("COURIER_CONFIG").unwrap_or_else(|_| "courier.toml".to_string());
    let config = ServiceConfig::load(Path::new(&config_path))?;
    tracing::info!(
        name = %config.service.name,
        instance = %config.service.instance_id,
        config = %config_path,
        "starting"
    );

    let driver = match config.database.backend.as_str() {
        "memory" => Arc::new(MemoryDriver::new()),
        other => {
            return Err(format!("unsupported database backend: {other} (supported: memory)").into())
        }
    };
    let gateway = Arc::new(FcmClient::new(&config.push)?);

    let service = PushService::start(config, driver, gateway, Arc::new(LogAlertSink)).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    service.shutdown();

    Ok(())
}
