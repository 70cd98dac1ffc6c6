use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use cadence_core::config::{CadenceConfig, StartupTask};
use cadence_scheduler::{LogJob, SchedulerEngine, SchedulerHandle};

mod app;
mod http;

/// Runtime-registered recurring jobs behind a small HTTP API.
#[derive(Debug, Parser)]
#[command(name = "cadence-gateway", version, about)]
struct Args {
    /// Config file. Falls back to $CADENCE_CONFIG, then ~/.cadence/cadence.toml.
    #[arg(long)]
    config: Option<String>,

    /// Override `gateway.bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `gateway.port`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cadence_gateway=info,cadence_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let args = Args::parse();

    // load config: --config > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let mut config = CadenceConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });
    if let Some(bind) = args.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    let engine = SchedulerEngine::new(&config.scheduler)?;
    let scheduler = engine.handle();
    register_startup_tasks(&scheduler, &config.scheduler.tasks);

    // spawn scheduler engine loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, scheduler));
    let router = app::build_router(state);

    info!("Cadence gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal scheduler to stop and let running jobs finish
    let _ = shutdown_tx.send(true);
    if let Err(e) = engine_task.await {
        warn!("scheduler engine task ended abnormally: {e}");
    }
    info!("Cadence gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => {
            warn!("Ctrl-C handler unavailable ({e}), running until killed");
            std::future::pending::<()>().await;
        }
    }
}

/// Register tasks declared under `[[scheduler.tasks]]`. Bad entries are
/// logged and skipped.
fn register_startup_tasks(scheduler: &SchedulerHandle, tasks: &[StartupTask]) {
    for task in tasks {
        let job = Arc::new(LogJob::new(task.trigger.kind_label()));
        match scheduler.register(&task.id, task.trigger.clone(), job) {
            Ok(first) => info!(task_id = %task.id, fire_at = %first, "startup task registered"),
            Err(e) => warn!(task_id = %task.id, code = e.code(), "skipping startup task: {e}"),
        }
    }
}
