//! `foglined`: the edge-fog agent daemon entry point.

use anyhow::Context as _;
use fogline::config::AgentConfig;
use fogline::context::AgentContext;
use fogline::observability::init_tracing;
use fogline::server;
use fogline::supervisor::Supervisor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing().context("failed to install tracing subscriber")?;

    let config_path = std::env::var_os("FOGLINE_CONFIG").map(PathBuf::from);
    let config = AgentConfig::load(config_path.as_deref()).context("failed to load configuration")?;
    info!(
        bind_address = %config.bind_address,
        api_port = config.api_port.into_inner(),
        "starting foglined"
    );

    let shutdown_grace = config.shutdown_grace.as_duration();
    let speed_sampler_interval = config.speed_sampler_interval.as_duration();
    let watchdog_interval = config.watchdog_interval.as_duration();

    let context = Arc::new(
        AgentContext::new(config)
            .await
            .context("failed to initialize agent context")?,
    );

    let cancellation = CancellationToken::new();
    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&context.routing),
        Arc::clone(&context.lifecycle),
        speed_sampler_interval,
        watchdog_interval,
        cancellation.clone(),
    ));
    let (_task_sender, task_receiver) = tokio::sync::mpsc::unbounded_channel();
    let mut handles = supervisor.spawn_all(task_receiver);

    let (listener, addr) = server::bind(&context)
        .await
        .context("failed to bind local API listener")?;
    info!(%addr, "local API listening");

    let server_cancellation = cancellation.clone();
    let server_context = Arc::clone(&context);
    let server_handle = tokio::spawn(async move {
        server::serve_with_graceful_shutdown(listener, server_context, server_cancellation).await
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to install ctrl-c handler")?;
    info!("shutdown signal received");
    cancellation.cancel();

    for handle in handles.drain(..) {
        let _ = tokio::time::timeout(shutdown_grace, handle).await;
    }
    let _ = tokio::time::timeout(shutdown_grace, server_handle).await;

    info!("foglined shut down");
    Ok(())
}
