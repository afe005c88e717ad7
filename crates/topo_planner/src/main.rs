use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sim_world::SimPlanner;
use tokio::sync::watch;
use topo_planner::{IdlenessLogger, Metrics, Scenario, Simulation, TopologyGraph};
use tracing_subscriber::{fmt, EnvFilter};

/// `patrol` - multi-robot topological patrolling in a simulated world.
///
/// Loads a scenario, starts the planner and one navigator per robot, and
/// keeps every interest point visited as often as the fleet allows. Stops on
/// Ctrl+C, SIGTERM, or when the scenario's duration elapses.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML scenario file.
    #[arg(long, env = "PATROL_CONFIG")]
    config: PathBuf,

    /// Adjacency list of the topological map. Overrides the scenario.
    #[arg(long, env = "PATROL_ADJLIST")]
    adjlist: Option<PathBuf>,

    /// Environment name used in logs and the statistics file name.
    #[arg(long, env = "PATROL_ENVIRONMENT")]
    environment: Option<String>,

    /// Seed for the destination tie-break.
    #[arg(long, env = "PATROL_SEED")]
    seed: Option<u64>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "PATROL_METRICS_LISTEN_ADDR")]
    metrics_listen_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut scenario = Scenario::load(&cli.config)
        .with_context(|| format!("Failed to load scenario {}", cli.config.display()))?;
    if let Some(adjlist) = cli.adjlist {
        scenario.adjlist = Some(adjlist);
    }
    if let Some(environment) = cli.environment {
        scenario.environment = environment;
    }
    if cli.seed.is_some() {
        scenario.seed = cli.seed;
    }

    let subscriber = fmt().with_env_filter(EnvFilter::from_default_env());
    if scenario.logging {
        subscriber.compact().init();
    } else {
        subscriber.json().init();
    }
    tracing::info!(scenario = ?cli.config, environment = %scenario.environment, "Loaded scenario");

    let adjlist = scenario
        .adjlist
        .clone()
        .context("No adjacency list: set `adjlist` in the scenario or pass --adjlist")?;
    let graph = TopologyGraph::load(&adjlist)
        .and_then(|graph| scenario.pose_map(graph))
        .with_context(|| format!("Invalid topological map {}", adjlist.display()))?;

    let metrics = Arc::new(Metrics::new());
    let planner = Arc::new(SimPlanner::new(scenario.robot.plan_resolution));
    let logger = IdlenessLogger::new(
        &scenario.simulation.dump_dir,
        scenario.environment.clone(),
        scenario.robots.len(),
    );

    let simulation = Simulation::start(&scenario, graph, planner, metrics.clone())
        .context("Failed to start simulation")?;

    let (metrics_shutdown_tx, mut metrics_shutdown_rx) = watch::channel(());
    let metrics_handle = cli.metrics_listen_addr.map(|addr| {
        let router = metrics.router();
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(%addr, "Metrics server started");
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = metrics_shutdown_rx.changed().await;
                })
                .await?;
            Ok::<(), anyhow::Error>(())
        })
    });

    tracing::info!(run_id = %logger.run_id(), duration = ?scenario.duration(), "Patrolling. Awaiting shutdown...");
    tokio::select! {
        _ = shutdown_signal() => tracing::info!("Shutdown signal received"),
        _ = run_for(scenario.duration()) => tracing::info!("Simulation time elapsed"),
    }

    let (stats, elapsed) = simulation.shutdown().await;
    if scenario.simulation.dump {
        if let Err(e) = logger.write(&stats, elapsed) {
            tracing::error!(error = %e, "Failed to save idleness statistics");
        }
    } else {
        tracing::warn!("Simulation dump disabled, idleness statistics not saved");
    }

    drop(metrics_shutdown_tx);
    if let Some(handle) = metrics_handle {
        match handle.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Metrics server failed"),
            Err(e) => tracing::error!(error = %e, "Metrics server task panicked"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("Patrol shut down gracefully");
    Ok(())
}

/// Resolves after `duration`, or never.
async fn run_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Listens for OS shutdown signals (SIGINT, SIGTERM) and resolves when one is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
