use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use turnstile::clock::{duration_millis, Clock, SystemClock};
use turnstile::config::{LimitSettings, LogFormat, LoggingConfig, StoreBackend, TurnstileConfig};
use turnstile::http::HttpServer;
use turnstile::ratelimit::{AdmissionControl, Dimension, LimiterSelector};
use turnstile::store::{CounterStore, MemoryStore, RedisStore, RedisStoreConfig};

/// Sliding-window request admission in front of an HTTP handler.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the configuration)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Counter store backend (overrides the configuration)
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,

    /// Redis connection URL (overrides the configuration)
    #[arg(long)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TurnstileConfig::load(cli.config.as_deref())
        .context("failed to load service configuration")?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(store) = cli.store {
        config.store.backend = store;
    }
    if let Some(redis_url) = cli.redis_url {
        config.store.redis_url = redis_url;
    }

    init_tracing(&config.logging);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limits = match LimitSettings::from_env() {
        Ok(limits) => limits,
        Err(e) => {
            error!(error = %e, "Invalid rate limit configuration");
            return Err(e).context("invalid rate limit configuration");
        }
    };
    for dimension in [Dimension::Ip, Dimension::Token] {
        let limit = limits.for_dimension(dimension);
        info!(
            dimension = %dimension,
            max_requests = limit.capacity(),
            window_seconds = limit.window().as_secs(),
            block_seconds = limit.block().as_secs(),
            "Rate limit setup"
        );
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let retention = limits.longest_retention();

    let (store, sweeper): (Arc<dyn CounterStore>, Option<JoinHandle<()>>) =
        match config.store.backend {
            StoreBackend::Redis => {
                let store_config = RedisStoreConfig {
                    key_prefix: config.store.key_prefix.clone(),
                    key_ttl: retention,
                };
                let store = RedisStore::connect_with_config(&config.store.redis_url, store_config)
                    .await
                    .with_context(|| {
                        format!("failed to connect to Redis at {}", config.store.redis_url)
                    })?;
                let store: Arc<dyn CounterStore> = Arc::new(store);
                (store, None)
            }
            StoreBackend::Memory => {
                let memory = Arc::new(MemoryStore::new());
                let interval = Duration::from_secs(config.store.sweep_interval_secs.max(1));
                let sweeper =
                    spawn_sweeper(Arc::clone(&memory), Arc::clone(&clock), retention, interval);
                info!(interval_secs = interval.as_secs(), "Using in-memory counter store");
                let store: Arc<dyn CounterStore> = memory;
                (store, Some(sweeper))
            }
        };

    let admission: Arc<dyn AdmissionControl> = Arc::new(LimiterSelector::token_then_ip(
        &limits,
        Arc::clone(&store),
        clock,
    ));
    info!("Admission control initialized");

    HttpServer::new(config.server.listen_addr, admission)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    drop(store);
    info!("Counter store released");

    info!("Turnstile stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Periodically drop memory-store entries no limiter will read again.
fn spawn_sweeper(
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    every: Duration,
) -> JoinHandle<()> {
    let retention_ms = duration_millis(retention).unwrap_or(i64::MAX);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let cutoff = clock.now_millis().saturating_sub(retention_ms);
            let removed = store.sweep(cutoff);
            debug!(removed, tracked = store.len(), "Memory store sweep");
        }
    })
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
