use std::sync::Arc;

use chanlink_core::{config::Config, store};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), chanlink_core::Error> {
    chanlink_core::logging::init("chanlink")?;

    let cfg = Arc::new(Config::load()?);
    let pool = store::connect(&cfg.database_url, cfg.database_max_connections).await?;
    info!(database = %cfg.database_url, "database ready");

    chanlink_telegram::router::run_polling(cfg, pool)
        .await
        .map_err(|e| chanlink_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
