use std::sync::Arc;

use anyhow::Context;

use pantry_api::app::{self, services};
use pantry_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    pantry_observability::init(config.log_format);

    let services = services::build_services(&config)
        .await
        .context("failed to initialize storage")?;
    let app = app::build_app(Arc::new(services));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        storage = %config.storage,
        "listening"
    );

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
