//! phpeek-pmd: the process manager daemon
//! Loads the config, starts the fleet in dependency order, and serves the
//! control plane until SIGINT/SIGTERM drains everything back down.

use clap::Parser;
use phpeek_pm::adapters::rest::{build_router, pick_socket_path, serve_tcp, serve_unix, AppState};
use phpeek_pm::application::{reload_watcher, resource_sampler, ResourceSampler, SupervisionScheduler};
use phpeek_pm::constants::{control_plane, env as env_keys, sampler as sampler_defaults};
use phpeek_pm::infrastructure::config;
use phpeek_pm::{LogCollector, SysinfoReader, UnixProcessSpawner};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "phpeek-pmd", about = "Declarative process fleet manager")]
struct Args {
    /// Path to the process configuration file
    #[arg(short, long, default_value = "phpeek-pm.yaml")]
    config: PathBuf,

    /// TCP bind address for the control plane
    #[arg(long, default_value = control_plane::DEFAULT_BIND_ADDR)]
    bind: SocketAddr,

    /// Unix socket path (default: first writable of the standard locations)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Disable the unix socket listener
    #[arg(long)]
    no_socket: bool,

    /// Disable the config file watcher
    #[arg(long)]
    no_watch: bool,

    /// Resource sampling interval in seconds
    #[arg(long, default_value_t = sampler_defaults::DEFAULT_INTERVAL_SEC)]
    sample_interval: u64,

    /// Deadline for the shutdown drain in seconds
    #[arg(long, default_value_t = 30)]
    shutdown_timeout: u64,
}

fn init_tracing() {
    let filter = std::env::var(env_keys::LOG_LEVEL)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();

    let config_path = std::env::var(env_keys::CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or(args.config);

    let defs = match config::load(&config_path) {
        Ok(defs) => defs,
        Err(err) => {
            error!(path = %config_path.display(), error = %err, "Configuration rejected");
            std::process::exit(1);
        }
    };

    let logs = Arc::new(LogCollector::new());
    let scheduler = match SupervisionScheduler::new(
        config_path.clone(),
        defs,
        Arc::new(UnixProcessSpawner::new()),
        logs.clone(),
    )
    .await
    {
        Ok(scheduler) => scheduler,
        Err(err) => {
            error!(error = %err, "Scheduler init failed");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();

    // Resource sampling
    let sampler = Arc::new(ResourceSampler::new(Arc::new(SysinfoReader::new())));
    scheduler.attach_sampler(sampler.clone());
    let sampler_scheduler = scheduler.clone();
    resource_sampler::spawn(
        sampler.clone(),
        Duration::from_secs(args.sample_interval.max(1)),
        move || sampler_scheduler.sample_targets(),
        cancel.child_token(),
    );

    // Config file watcher
    if !args.no_watch {
        reload_watcher::spawn(scheduler.clone(), config_path.clone(), cancel.child_token());
    }

    // Control plane
    let state = AppState {
        scheduler: scheduler.clone(),
        logs,
        sampler,
        started_at: Instant::now(),
    };
    let router = build_router(state);

    let tcp_cancel = cancel.child_token();
    let tcp_router = router.clone();
    let tcp = tokio::spawn(async move {
        if let Err(err) = serve_tcp(tcp_router, args.bind, tcp_cancel).await {
            error!(error = %err, "TCP listener failed");
        }
    });

    let socket_path = if args.no_socket {
        None
    } else {
        args.socket.clone().or_else(pick_socket_path)
    };
    let unix = socket_path.map(|path| {
        let unix_cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Err(err) = serve_unix(router, &path, unix_cancel).await {
                warn!(error = %err, "Unix socket listener failed");
            }
        })
    });

    // Bring the fleet up
    let start_cancel = cancel.child_token();
    match scheduler.start_all(&start_cancel).await {
        Ok(()) => info!("All processes started"),
        Err(err) => {
            error!(error = %err, "Start-all failed; continuing with partial fleet");
        }
    }

    // Run until a termination signal arrives
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(err) => {
            error!(error = %err, "Cannot install SIGTERM handler");
            std::process::exit(1);
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }

    info!("Shutting down");
    scheduler
        .shutdown(Some(Duration::from_secs(args.shutdown_timeout)))
        .await;
    cancel.cancel();
    let _ = tcp.await;
    if let Some(unix) = unix {
        let _ = unix.await;
    }
    info!("Bye");
}
