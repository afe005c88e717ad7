//! Wires the planner tasks and the simulated fleet into one run.

use std::sync::Arc;
use std::time::Duration;

use api::{Bus, PathPlanner};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use topo_navigator::NavigatorMetrics;

use crate::config::Scenario;
use crate::destinations::{run_availability_sweep, DestinationRegistry, DestinationStats};
use crate::dispatcher::TaskDispatcher;
use crate::fleet::Fleet;
use crate::graph::TopologyGraph;
use crate::metrics::Metrics;
use crate::robots::{run_report_listener, RobotRegistry};
use crate::state::PlannerState;
use crate::telemetry::run_destination_telemetry;
use crate::{PlannerError, PlannerResult};

/// A running patrol: planner tasks plus one navigator and one simulated
/// robot per fleet member.
pub struct Simulation {
    state: Arc<PlannerState>,
    tasks: Vec<JoinHandle<()>>,
    fleet: Fleet,
    shutdown_tx: watch::Sender<()>,
    started: Instant,
}

impl Simulation {
    /// Starts every task. `graph` must already carry the scenario's poses
    /// (see [`Scenario::pose_map`]).
    pub fn start(
        scenario: &Scenario,
        graph: TopologyGraph,
        planner: Arc<dyn PathPlanner>,
        metrics: Arc<Metrics>,
    ) -> PlannerResult<Self> {
        let refresh_period = scenario.refresh_period()?;
        let telemetry_period = scenario.telemetry_period()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let bus = Bus::new(scenario.link());
        let nav_metrics = NavigatorMetrics::register(&metrics.registry)
            .map_err(|e| PlannerError::Configuration(format!("navigator metrics: {e}")))?;

        let robots = RobotRegistry::new(Fleet::roster(scenario))
            .with_ack_timeout(Duration::from_millis(scenario.planner.ack_timeout_ms));
        let state = PlannerState::new(
            graph,
            DestinationRegistry::new(&scenario.interest_points()),
            robots,
            bus.clone(),
            scenario.topics(),
            metrics.clone(),
        );

        let fleet = Fleet::spawn(
            scenario,
            bus.clone(),
            planner.clone(),
            Some(Arc::new(nav_metrics)),
            shutdown_rx.clone(),
        )?;

        let tasks = vec![
            tokio::spawn(run_availability_sweep(
                state.destinations.clone(),
                state.robots.clone(),
                refresh_period,
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_report_listener(
                bus,
                state.topics.clone(),
                state.robots.clone(),
                Some(metrics),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_destination_telemetry(
                state.clone(),
                telemetry_period,
                shutdown_rx.clone(),
            )),
            TaskDispatcher::new(scenario.dispatch_config(), state.clone(), planner, scenario.seed)
                .spawn(shutdown_rx),
        ];

        tracing::info!(
            environment = %scenario.environment,
            robots = fleet.len(),
            destinations = state.destinations.len(),
            "Simulation started"
        );

        Ok(Self {
            state,
            tasks,
            fleet,
            shutdown_tx,
            started: Instant::now(),
        })
    }

    pub fn state(&self) -> &Arc<PlannerState> {
        &self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Signals every task to stop and waits for them. Returns the idleness
    /// statistics as they stood when shutdown began.
    pub async fn shutdown(self) -> (Vec<DestinationStats>, Duration) {
        let stats = self.state.destinations.statistics();
        let elapsed = self.started.elapsed();
        drop(self.shutdown_tx);

        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Planner task failed");
            }
        }
        self.fleet.join().await;
        tracing::info!(elapsed = ?elapsed, "Simulation stopped");
        (stats, elapsed)
    }
}
