use anyhow::Context;

use tollgate_api::{app, settings::Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tollgate_observability::init();

    let settings = Settings::from_env().context("failed to load settings")?;
    tracing::info!(
        algorithm = ?settings.auth.algorithm,
        access_ttl_secs = settings.auth.access_ttl.num_seconds(),
        refresh_ttl_secs = settings.auth.refresh_ttl.num_seconds(),
        projection = ?settings.auth.projection,
        "configuration loaded"
    );

    let orchestrator = app::services::build_orchestrator(&settings).await?;
    let router = app::build_app(orchestrator);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}
