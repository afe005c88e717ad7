//! Per-robot navigation state machine.
//!
//! ```text
//!          path received                 last waypoint reached
//!  READY ─────────────────▶ BUSY ───────────────────────────────▶ READY
//! ```
//!
//! Three tasks share one [`Navigator`]:
//! - the pose handler checks the current goal and recomputes afference on
//!   every localisation update;
//! - the path follower sends the waypoints of each path one at a time and
//!   waits for the pose handler to confirm each before sending the next;
//! - the state broadcaster publishes the full [`RobotState`] at a fixed rate,
//!   changed or not.

use std::sync::Arc;
use std::time::Duration;

use api::v1::{Pose, PoseWithCovariance, RobotState, RobotStatus, RobotTopopath, ToponavIpoint};
use api::{Bus, PathPlanner, RetryPolicy, Subscription, Topics};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::afference::{Afference, AfferenceEstimator, AfferenceMode};
use crate::metrics::NavigatorMetrics;
use crate::{NavigatorError, NavigatorResult};

#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    pub namespace: String,
    /// A goal is reached within this planar distance, metres.
    pub ipoint_radius: f64,
    /// Interval between state reports. Must be non-zero.
    pub state_period: Duration,
    pub afference_mode: AfferenceMode,
    /// Also publish both afference strategies on the debug topic.
    pub debug_afference: bool,
    pub plan_retry: RetryPolicy,
    /// The current goal is sent again if not reached within this long.
    /// Must be non-zero.
    pub goal_resend: Duration,
    pub topics: Topics,
}

impl NavigatorConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: api::topics::normalize_namespace(&namespace.into()),
            ipoint_radius: 0.5,
            state_period: Duration::from_millis(200),
            afference_mode: AfferenceMode::Euclidean,
            debug_afference: false,
            plan_retry: RetryPolicy::default(),
            goal_resend: Duration::from_secs(5),
            topics: Topics::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Status {
    busy: bool,
    pose: Option<Pose>,
    current_goal: Option<ToponavIpoint>,
    latest_goal: Option<String>,
    final_goal: Option<String>,
    afference: Option<Afference>,
}

pub struct Navigator {
    config: NavigatorConfig,
    status: Mutex<Status>,
    estimator: AfferenceEstimator,
    bus: Arc<Bus>,
    reached: Notify,
    metrics: Option<Arc<NavigatorMetrics>>,
}

impl Navigator {
    pub fn new(
        config: NavigatorConfig,
        interest_points: Vec<ToponavIpoint>,
        bus: Arc<Bus>,
        planner: Arc<dyn PathPlanner>,
        metrics: Option<Arc<NavigatorMetrics>>,
    ) -> NavigatorResult<Arc<Self>> {
        if config.state_period.is_zero() {
            return Err(NavigatorError::InvalidConfig("state period must be non-zero".into()));
        }
        if config.goal_resend.is_zero() {
            return Err(NavigatorError::InvalidConfig("goal resend interval must be non-zero".into()));
        }
        let estimator = AfferenceEstimator::new(
            config.afference_mode,
            interest_points,
            planner,
            config.ipoint_radius,
            config.plan_retry,
        )?;
        Ok(Arc::new(Self {
            config,
            status: Mutex::new(Status::default()),
            estimator,
            bus,
            reached: Notify::new(),
            metrics,
        }))
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Last localised pose.
    pub fn pose(&self) -> Option<Pose> {
        self.status.lock().pose
    }

    /// Subscribes to the pose and path topics, then runs the three tasks
    /// until shutdown.
    pub fn spawn(self: Arc<Self>, shutdown_rx: watch::Receiver<()>) -> JoinHandle<()> {
        let ns = self.config.namespace.clone();
        let poses = self
            .bus
            .subscribe::<PoseWithCovariance>(&self.config.topics.pose(&ns));
        let paths = self
            .bus
            .subscribe::<RobotTopopath>(&self.config.topics.robot_topopath(&ns));

        tokio::spawn(async move {
            tracing::info!(robot = %ns, mode = ?self.estimator.mode(), "Navigator started");
            tokio::join!(
                self.clone().run_pose_handler(poses, shutdown_rx.clone()),
                self.clone().run_path_follower(paths, shutdown_rx.clone()),
                self.clone().run_state_broadcaster(shutdown_rx),
            );
            tracing::info!(robot = %ns, "Navigator stopped");
        })
    }

    /// The report the broadcaster would publish now. `None` until the first
    /// afference is known.
    pub fn report(&self) -> Option<RobotState> {
        let s = self.status.lock();
        let afference = s.afference.as_ref()?;
        let mut report = RobotState {
            robot_name: self.config.namespace.clone(),
            afference: Some(afference.name.clone()),
            distance: afference.distance,
            current_goal: s.current_goal.as_ref().map(|g| g.name.clone()),
            latest_goal: s.latest_goal.clone(),
            final_goal: s.final_goal.clone(),
            ..Default::default()
        };
        report.set_state(if s.busy { RobotStatus::Busy } else { RobotStatus::Ready });
        Some(report)
    }

    /// Goal check, then afference, for one localisation update.
    pub async fn on_pose(&self, pose: Pose) {
        let ns = self.config.namespace.as_str();
        let reached = {
            let mut s = self.status.lock();
            s.pose = Some(pose);
            let hit = s
                .current_goal
                .as_ref()
                .filter(|goal| pose.planar_distance(&goal.pose.unwrap_or_default()) <= self.config.ipoint_radius)
                .map(|goal| goal.name.clone());
            if let Some(name) = &hit {
                s.latest_goal = Some(name.clone());
                s.current_goal = None;
            }
            hit
        };

        if let Some(metrics) = &self.metrics {
            let p = pose.point();
            metrics.update_position(ns, p.x, p.y);
        }
        if let Some(name) = reached {
            tracing::info!(robot = %ns, waypoint = %name, "Waypoint reached");
            if let Some(metrics) = &self.metrics {
                metrics.goals_reached_total.with_label_values(&[ns]).inc();
            }
            self.reached.notify_one();
        }

        match self.estimator.estimate(&pose).await {
            Ok(afference) => self.status.lock().afference = Some(afference),
            Err(e) => {
                tracing::warn!(robot = %ns, error = %e, "Afference estimate failed");
                if let Some(metrics) = &self.metrics {
                    metrics.afference_failures_total.with_label_values(&[ns]).inc();
                }
            }
        }

        if self.config.debug_afference {
            let record = self.estimator.debug_record(ns, &pose).await;
            self.bus.publish(&self.config.topics.afference_debug, &record);
        }
    }

    /// Drives the robot through one path. Returns once the last waypoint is
    /// reached.
    pub async fn follow(&self, path: RobotTopopath) {
        let ns = self.config.namespace.as_str();
        let Some(last) = path.path.last() else {
            tracing::warn!(robot = %ns, "Ignoring empty path");
            return;
        };

        {
            let mut s = self.status.lock();
            s.busy = true;
            s.final_goal = Some(last.name.clone());
        }
        tracing::info!(robot = %ns, destination = %last.name, hops = path.path.len(), "Following path");

        let goal_topic = self.config.topics.goal(ns);
        for waypoint in path.path {
            let goal = waypoint.pose.unwrap_or_default();
            self.status.lock().current_goal = Some(waypoint);
            self.bus.publish(&goal_topic, &goal);

            loop {
                let notified = self.reached.notified();
                if self.status.lock().current_goal.is_none() {
                    break;
                }
                if tokio::time::timeout(self.config.goal_resend, notified).await.is_err() {
                    tracing::debug!(robot = %ns, "Goal not reached yet, sending it again");
                    self.bus.publish(&goal_topic, &goal);
                }
            }
        }

        {
            let mut s = self.status.lock();
            s.busy = false;
            s.final_goal = None;
        }
        if let Some(metrics) = &self.metrics {
            metrics.paths_completed_total.with_label_values(&[ns]).inc();
        }
        tracing::info!(robot = %ns, "Path completed");
    }

    async fn run_pose_handler(
        self: Arc<Self>,
        mut poses: Subscription<PoseWithCovariance>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                msg = poses.recv() => {
                    let Some(msg) = msg else { break };
                    if let Some(pose) = msg.pose {
                        self.on_pose(pose).await;
                    }
                }
            }
        }
    }

    async fn run_path_follower(
        self: Arc<Self>,
        mut paths: Subscription<RobotTopopath>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        loop {
            let path = tokio::select! {
                _ = shutdown_rx.changed() => break,
                path = paths.recv() => match path {
                    Some(path) => path,
                    None => break,
                },
            };
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = self.follow(path) => {}
            }
        }
    }

    async fn run_state_broadcaster(self: Arc<Self>, mut shutdown_rx: watch::Receiver<()>) {
        let topic = self.config.topics.robot_state(&self.config.namespace);
        let mut ticker = tokio::time::interval(self.config.state_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    let Some(report) = self.report() else { continue };
                    self.bus.publish(&topic, &report);
                    if let Some(metrics) = &self.metrics {
                        metrics.state_reports_total.with_label_values(&[self.config.namespace.as_str()]).inc();
                    }
                }
            }
        }
    }
}
