use anyhow::Context;

use txweave_engine::{Scheduler, SchedulerConfig};
use txweave_server::ServerConfig;
use txweave_server::app::{build_app, services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    txweave_observability::init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    let engine = services::build_engine(&config).await?;
    let scheduler = Scheduler::spawn(engine.clone(), SchedulerConfig::default());

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(addr = %listener.local_addr()?, owner = %engine.owner(), "listening");

    axum::serve(listener, build_app(engine))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    scheduler.shutdown().await;
    Ok(())
}
