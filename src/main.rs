use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keythrottle::config::KeythrottleConfig;
use keythrottle::gate::GateServer;
use keythrottle::sweeper::Sweeper;
use keythrottle::throttle::{ShardedThrottler, Throttle, Throttler};

/// Per-key fixed-window admission gate.
#[derive(Debug, Parser)]
#[command(name = "keythrottle", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Admissions per client per window
    #[arg(long)]
    limit: Option<u64>,

    /// Window length in milliseconds
    #[arg(long)]
    period_ms: Option<u64>,

    /// Interval between sweeps of expired windows, in milliseconds
    #[arg(long)]
    clean_interval_ms: Option<u64>,

    /// Use the sharded counter registry
    #[arg(long)]
    sharded: bool,
}

impl Args {
    fn into_config(self) -> keythrottle::error::Result<KeythrottleConfig> {
        let mut config = match &self.config {
            Some(path) => KeythrottleConfig::from_file(path)?,
            None => KeythrottleConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.server.listen_addr = listen;
        }
        if let Some(limit) = self.limit {
            config.throttle.limit = limit;
        }
        if let Some(period_ms) = self.period_ms {
            config.throttle.period_ms = period_ms;
        }
        if let Some(clean_interval_ms) = self.clean_interval_ms {
            config.throttle.clean_interval_ms = clean_interval_ms;
        }
        if self.sharded {
            config.throttle.sharded = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Keythrottle admission gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Args::parse().into_config()?;
    let settings = &config.throttle;
    info!(
        listen_addr = %config.server.listen_addr,
        limit = settings.limit,
        period = ?settings.period(),
        sharded = settings.sharded,
        "Configuration loaded"
    );

    if settings.sharded {
        let throttle = Arc::new(match settings.shards {
            Some(shards) => ShardedThrottler::with_shards(settings.limit, settings.period(), shards),
            None => ShardedThrottler::new(settings.limit, settings.period()),
        });
        run(&config, throttle).await
    } else {
        let throttle = Arc::new(Throttler::new(settings.limit, settings.period()));
        run(&config, throttle).await
    }
}

async fn run<T: Throttle + 'static>(config: &KeythrottleConfig, throttle: Arc<T>) -> anyhow::Result<()> {
    let sweeper = Sweeper::spawn(Arc::clone(&throttle), config.throttle.clean_interval())?;

    GateServer::new(config.server.listen_addr, throttle)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    sweeper.shutdown().await;
    info!("Keythrottle admission gate stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and left pending rather
/// than aborting the gate.
async fn shutdown_signal() {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, stopping admission gate"),
            Err(e) => {
                warn!(error = %e, "Ctrl+C handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => info!("Received SIGTERM, stopping admission gate"),
    }
}
