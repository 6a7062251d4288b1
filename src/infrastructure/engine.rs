use crate::config::RelayConfig;
use crate::services::engine::{BackgroundRemover, HEALTH_CHECK_TIMEOUT};
use std::sync::Arc;
use tracing::info;

pub async fn setup_engine(config: &RelayConfig) -> anyhow::Result<Arc<dyn BackgroundRemover>> {
    let engine = crate::services::engine::create_remover(&config.engine_type, &config.engine_url)?;

    // Warm up engine connection
    let reachable = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, engine.health_check())
        .await
        .unwrap_or(false);
    if reachable {
        info!("✂️  Background-removal engine '{}' is reachable", engine.name());
    } else {
        tracing::warn!(
            "⚠️  Engine '{}' at {} is unreachable! Uploads will fail until it comes up.",
            engine.name(),
            config.engine_url
        );
    }

    Ok(engine.into())
}
