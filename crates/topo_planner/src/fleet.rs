//! Brings up one simulated robot and one navigator per fleet member.

use std::sync::Arc;
use std::time::Duration;

use api::{Bus, PathPlanner};
use sim_world::{SimRobot, SimRobotConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use topo_navigator::{Navigator, NavigatorConfig, NavigatorMetrics};

use crate::config::Scenario;
use crate::robots::Robot;
use crate::{PlannerError, PlannerResult};

/// Tasks of every robot in the run.
pub struct Fleet {
    handles: Vec<JoinHandle<()>>,
}

impl Fleet {
    /// Spawns the fleet described by `scenario`. Every task stops when
    /// `shutdown_rx` fires.
    pub fn spawn(
        scenario: &Scenario,
        bus: Arc<Bus>,
        planner: Arc<dyn PathPlanner>,
        metrics: Option<Arc<NavigatorMetrics>>,
        shutdown_rx: watch::Receiver<()>,
    ) -> PlannerResult<Self> {
        let topics = scenario.topics();
        let interest_points = scenario.interest_points();
        let mut handles = Vec::with_capacity(scenario.robots.len() * 2);

        for entry in &scenario.robots {
            let start = scenario.start_pose(entry).ok_or_else(|| {
                PlannerError::Configuration(format!(
                    "robot {} starts on unknown waypoint {}",
                    entry.namespace, entry.start
                ))
            })?;

            let nav_config = NavigatorConfig {
                ipoint_radius: scenario.robot.ipoint_radius,
                state_period: scenario.state_period()?,
                afference_mode: scenario.robot.afference_mode,
                debug_afference: scenario.robot.debug_afference,
                plan_retry: scenario.plan_retry(),
                goal_resend: Duration::from_millis(scenario.robot.goal_resend_ms),
                topics: topics.clone(),
                ..NavigatorConfig::new(entry.namespace.as_str())
            };
            let namespace = nav_config.namespace.clone();

            let navigator = Navigator::new(
                nav_config,
                interest_points.clone(),
                bus.clone(),
                planner.clone(),
                metrics.clone(),
            )?;
            handles.push(navigator.spawn(shutdown_rx.clone()));

            let sim = SimRobot::new(SimRobotConfig {
                namespace: namespace.clone(),
                start,
                max_speed: scenario.robot.max_speed,
                pose_period: scenario.pose_period()?,
                topics: topics.clone(),
            });
            handles.push(sim.spawn(bus.clone(), shutdown_rx.clone()));

            tracing::info!(robot = %namespace, color = %entry.color, start = %entry.start, "Robot spawned");
        }

        Ok(Self { handles })
    }

    /// Planner-side records for the same robots.
    pub fn roster(scenario: &Scenario) -> Vec<Robot> {
        scenario
            .robots
            .iter()
            .map(|entry| Robot::new(&entry.namespace, entry.color.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every robot task to stop.
    pub async fn join(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Robot task failed");
            }
        }
    }
}
