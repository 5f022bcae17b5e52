use bollard::Docker;
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use faas_executor::{readiness::probe_for, DockerProvider};
use faas_gateway_server::{
    auth::PermissionManager, config::DispatcherConfig, create_app, proxy::HttpProxy, AppState,
};
use faas_orchestrator::{AdmissionLimiter, Dispatcher, InstancePool};
use faas_usage_tracker::{InMemoryStorage, UsageTracker};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Serverless function dispatcher
#[derive(Parser, Debug)]
#[command(name = "faas-dispatcher", version, about)]
struct Cli {
    /// Path to the dispatcher configuration file (.yaml)
    #[arg(short, long, env = "FAAS_DISPATCHER_CONFIG", default_value = "config/dispatcher.yaml")]
    config: PathBuf,

    /// Address to listen on
    #[arg(short, long, env = "FAAS_DISPATCHER_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Override the default per-function admission capacity
    #[arg(long, env = "FAAS_DISPATCHER_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "FAAS_DISPATCHER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    info!(config = %cli.config.display(), "Loading configuration");
    let mut config = DispatcherConfig::load(&cli.config)
        .wrap_err_with(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(limit) = cli.max_concurrency {
        config.max_concurrency = limit;
    }
    config.validate()?;

    let docker = Arc::new(Docker::connect_with_local_defaults().wrap_err("Failed to connect to Docker")?);
    let provider = Arc::new(DockerProvider::new(docker));

    let templates: HashMap<_, _> = config.functions.clone().into_iter().collect();
    let pool = Arc::new(InstancePool::new(provider, templates, config.scaling.clone()));

    let limiter = Arc::new(AdmissionLimiter::new(config.max_concurrency));
    for (function, limit) in &config.capacities {
        limiter.set_capacity(function, *limit);
    }

    let usage = Arc::new(UsageTracker::new(Arc::new(InMemoryStorage::new())));
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        limiter,
        probe_for(config.probe.kind, config.probe.timeout()),
        Arc::new(PermissionManager::from_config(&config.permissions)),
        usage.clone(),
        config.dispatch.clone(),
    ));

    let monitor = pool.start_monitor().await?;

    let state = AppState {
        dispatcher,
        proxy: Arc::new(HttpProxy::new(config.upstream_timeout())),
        usage,
    };
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", cli.listen))?;
    info!(
        addr = %cli.listen,
        functions = ?pool.functions(),
        "FaaS dispatcher listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        warn!(error = %e, "HTTP server stopped with an error");
    }

    info!("Stopping autoscaling monitor");
    monitor.stop().await;
    pool.shutdown_all().await;
    info!("Dispatcher shut down");

    served.wrap_err("HTTP server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
