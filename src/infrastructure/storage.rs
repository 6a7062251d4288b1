use crate::config::RelayConfig;
use crate::services::storage::LocalStorage;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &RelayConfig) -> anyhow::Result<Arc<LocalStorage>> {
    let storage =
        LocalStorage::init(&config.upload_dir, &config.processed_dir, config.clear_on_start)
            .await?;

    info!("📂 Upload dir: {}", storage.upload_dir().display());
    info!("🖼️  Processed dir: {}", storage.processed_dir().display());

    Ok(Arc::new(storage))
}
