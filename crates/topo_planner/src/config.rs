//! Scenario file for the `patrol` binary.
//!
//! ```toml
//! environment = "office"
//! adjlist = "office.adjlist"
//!
//! [simulation]
//! duration = 10
//! time_measure = "minutes"
//! dump = true
//!
//! [[interest_points]]
//! name = "WayPoint1"
//! x = 0.0
//! y = 0.0
//!
//! [[robots]]
//! namespace = "robot_1"
//! color = "red"
//! start = "WayPoint1"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use api::v1::{Pose, ToponavIpoint};
use api::{LinkProfile, RetryPolicy, Topics};
use serde::Deserialize;
use topo_navigator::AfferenceMode;

use crate::dispatcher::DispatchConfig;
use crate::graph::TopologyGraph;
use crate::{PlannerError, PlannerResult};

#[derive(Clone, Debug, Deserialize)]
pub struct Scenario {
    /// Used in log lines and the statistics file name.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Adjacency list of the topological map, relative to the scenario file.
    pub adjlist: Option<PathBuf>,

    /// Seed for the destination tie-break. Entropy when absent.
    pub seed: Option<u64>,

    /// Human-readable log output instead of JSON.
    #[serde(default)]
    pub logging: bool,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub robot: RobotConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub topics: TopicsConfig,

    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub interest_points: Vec<PointConfig>,

    /// Map waypoints that are not interest points but still need a pose.
    #[serde(default)]
    pub waypoints: Vec<PointConfig>,

    #[serde(default)]
    pub robots: Vec<RobotEntry>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMeasure {
    #[default]
    Seconds,
    Minutes,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SimulationConfig {
    /// Auto-shutdown after this long; run until signalled when absent.
    pub duration: Option<f64>,

    #[serde(default)]
    pub time_measure: TimeMeasure,

    /// Write idleness statistics at shutdown.
    #[serde(default)]
    pub dump: bool,

    #[serde(default = "default_dump_dir")]
    pub dump_dir: PathBuf,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration: None,
            time_measure: TimeMeasure::default(),
            dump: false,
            dump_dir: default_dump_dir(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RobotConfig {
    /// m/s (default: 0.5)
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,

    /// Goal tolerance in metres (default: 0.5)
    #[serde(default = "default_ipoint_radius")]
    pub ipoint_radius: f64,

    /// State reports per second (default: 5)
    #[serde(default = "default_state_rate")]
    pub state_rate: f64,

    #[serde(default)]
    pub afference_mode: AfferenceMode,

    #[serde(default)]
    pub debug_afference: bool,

    /// Simulated localisation rate in Hz (default: 10)
    #[serde(default = "default_pose_rate")]
    pub pose_rate: f64,

    /// Spacing of simulated plan poses in metres (default: 0.1)
    #[serde(default = "default_plan_resolution")]
    pub plan_resolution: f64,

    /// Resend an unreached goal after this long (default: 5000)
    #[serde(default = "default_goal_resend_ms")]
    pub goal_resend_ms: u64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            max_speed: default_max_speed(),
            ipoint_radius: default_ipoint_radius(),
            state_rate: default_state_rate(),
            afference_mode: AfferenceMode::default(),
            debug_afference: false,
            pose_rate: default_pose_rate(),
            plan_resolution: default_plan_resolution(),
            goal_resend_ms: default_goal_resend_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: f64,

    #[serde(default = "default_telemetry_hz")]
    pub telemetry_hz: f64,

    #[serde(default = "default_destination_poll_ms")]
    pub destination_poll_ms: u64,

    #[serde(default = "default_plan_timeout_ms")]
    pub plan_timeout_ms: u64,

    #[serde(default = "default_plan_backoff_ms")]
    pub plan_backoff_ms: u64,

    #[serde(default = "default_subscriber_wait_ms")]
    pub subscriber_wait_ms: u64,

    /// How long a robot may keep reporting READY after a path was sent.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            refresh_hz: default_refresh_hz(),
            telemetry_hz: default_telemetry_hz(),
            destination_poll_ms: default_destination_poll_ms(),
            plan_timeout_ms: default_plan_timeout_ms(),
            plan_backoff_ms: default_plan_backoff_ms(),
            subscriber_wait_ms: default_subscriber_wait_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

/// Overrides for topic names; unset entries keep the defaults.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TopicsConfig {
    pub robot_state: Option<String>,
    pub robot_topopath: Option<String>,
    pub pose: Option<String>,
    pub goal: Option<String>,
    pub destinations_log: Option<String>,
    pub afference_debug: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub drop_chance_percent: u8,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PointConfig {
    pub name: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RobotEntry {
    pub namespace: String,
    #[serde(default = "default_color")]
    pub color: String,
    /// Waypoint the robot starts on.
    pub start: String,
}

fn default_environment() -> String {
    "default".into()
}
fn default_dump_dir() -> PathBuf {
    PathBuf::from("stats")
}
fn default_max_speed() -> f64 {
    0.5
}
fn default_ipoint_radius() -> f64 {
    0.5
}
fn default_state_rate() -> f64 {
    5.0
}
fn default_pose_rate() -> f64 {
    10.0
}
fn default_plan_resolution() -> f64 {
    0.1
}
fn default_goal_resend_ms() -> u64 {
    5_000
}
fn default_refresh_hz() -> f64 {
    5.0
}
fn default_telemetry_hz() -> f64 {
    1.0
}
fn default_destination_poll_ms() -> u64 {
    500
}
fn default_plan_timeout_ms() -> u64 {
    10_000
}
fn default_plan_backoff_ms() -> u64 {
    200
}
fn default_subscriber_wait_ms() -> u64 {
    2_000
}
fn default_ack_timeout_ms() -> u64 {
    5_000
}
fn default_color() -> String {
    "red".into()
}

impl Scenario {
    /// Loads and validates a scenario from a TOML file.
    pub fn load(path: &Path) -> PlannerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PlannerError::Configuration(format!("failed to read scenario {}: {e}", path.display()))
        })?;
        let mut scenario = Self::from_toml(&content)?;
        if let (Some(adjlist), Some(dir)) = (scenario.adjlist.as_mut(), path.parent()) {
            if adjlist.is_relative() {
                *adjlist = dir.join(&*adjlist);
            }
        }
        Ok(scenario)
    }

    pub fn from_toml(content: &str) -> PlannerResult<Self> {
        let scenario: Scenario = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> PlannerResult<()> {
        let fail = |msg: String| Err(PlannerError::Configuration(msg));

        if self.interest_points.is_empty() {
            return fail("at least one interest point is required".into());
        }
        if self.robots.is_empty() {
            return fail("at least one robot is required".into());
        }

        let positive = [
            ("robot.max_speed", self.robot.max_speed),
            ("robot.ipoint_radius", self.robot.ipoint_radius),
            ("robot.plan_resolution", self.robot.plan_resolution),
        ];
        for (key, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return fail(format!("{key} must be positive, got {value}"));
            }
        }
        self.state_period()?;
        self.pose_period()?;
        self.refresh_period()?;
        self.telemetry_period()?;

        let nonzero_ms = [
            ("robot.goal_resend_ms", self.robot.goal_resend_ms),
            ("planner.destination_poll_ms", self.planner.destination_poll_ms),
            ("planner.plan_backoff_ms", self.planner.plan_backoff_ms),
        ];
        for (key, value) in nonzero_ms {
            if value == 0 {
                return fail(format!("{key} must be at least 1"));
            }
        }

        if let Some(duration) = self.simulation.duration {
            if !(duration.is_finite() && duration > 0.0) || self.duration().is_none() {
                return fail(format!("simulation.duration must be positive and representable, got {duration}"));
            }
        }
        if self.link.drop_chance_percent > 100 {
            return fail("link.drop_chance_percent must be at most 100".into());
        }

        let mut names = HashSet::new();
        for p in self.interest_points.iter().chain(&self.waypoints) {
            if !names.insert(p.name.as_str()) {
                return fail(format!("waypoint {} is declared twice", p.name));
            }
        }

        let mut namespaces = HashSet::new();
        for r in &self.robots {
            if !namespaces.insert(api::topics::normalize_namespace(&r.namespace)) {
                return fail(format!("robot {} is declared twice", r.namespace));
            }
            if !names.contains(r.start.as_str()) {
                return fail(format!("robot {} starts on unknown waypoint {}", r.namespace, r.start));
            }
        }
        Ok(())
    }

    /// Auto-shutdown delay. `None` runs until a signal, and so does a
    /// duration too large for [`Duration`] (rejected by [`validate`](Self::validate)).
    pub fn duration(&self) -> Option<Duration> {
        let amount = self.simulation.duration?;
        let secs = match self.simulation.time_measure {
            TimeMeasure::Seconds => amount,
            TimeMeasure::Minutes => amount * 60.0,
        };
        Duration::try_from_secs_f64(secs).ok()
    }

    /// Interval between a navigator's state reports.
    pub fn state_period(&self) -> PlannerResult<Duration> {
        rate_period("robot.state_rate", self.robot.state_rate)
    }

    /// Interval between simulated pose estimates.
    pub fn pose_period(&self) -> PlannerResult<Duration> {
        rate_period("robot.pose_rate", self.robot.pose_rate)
    }

    /// Interval between availability sweeps.
    pub fn refresh_period(&self) -> PlannerResult<Duration> {
        rate_period("planner.refresh_hz", self.planner.refresh_hz)
    }

    /// Interval between destination telemetry batches.
    pub fn telemetry_period(&self) -> PlannerResult<Duration> {
        rate_period("planner.telemetry_hz", self.planner.telemetry_hz)
    }

    pub fn interest_points(&self) -> Vec<ToponavIpoint> {
        self.interest_points
            .iter()
            .map(|p| ToponavIpoint {
                pose: Some(p.pose()),
                name: p.name.clone(),
            })
            .collect()
    }

    /// Every posed waypoint, interest points first.
    pub fn waypoint_poses(&self) -> impl Iterator<Item = (&str, Pose)> {
        self.interest_points
            .iter()
            .chain(&self.waypoints)
            .map(|p| (p.name.as_str(), p.pose()))
    }

    pub fn start_pose(&self, robot: &RobotEntry) -> Option<Pose> {
        self.waypoint_poses()
            .find(|(name, _)| *name == robot.start)
            .map(|(_, pose)| pose)
    }

    /// Attaches the scenario's poses to `graph` and checks that every
    /// interest point is a reachable, posed waypoint.
    pub fn pose_map(&self, mut graph: TopologyGraph) -> PlannerResult<TopologyGraph> {
        for (name, pose) in self.waypoint_poses() {
            if graph.contains(name) {
                graph.set_pose(name, pose)?;
            } else {
                tracing::warn!(waypoint = name, "Posed waypoint is not part of the map");
            }
        }
        graph.ensure_connected(self.interest_points.iter().map(|p| p.name.as_str()))?;
        graph.ensure_posed()?;
        Ok(graph)
    }

    pub fn topics(&self) -> Topics {
        let t = &self.topics;
        let defaults = Topics::default();
        Topics {
            robot_state: t.robot_state.clone().unwrap_or(defaults.robot_state),
            robot_topopath: t.robot_topopath.clone().unwrap_or(defaults.robot_topopath),
            pose: t.pose.clone().unwrap_or(defaults.pose),
            goal: t.goal.clone().unwrap_or(defaults.goal),
            destinations_log: t.destinations_log.clone().unwrap_or(defaults.destinations_log),
            afference_debug: t.afference_debug.clone().unwrap_or(defaults.afference_debug),
        }
    }

    pub fn link(&self) -> LinkProfile {
        LinkProfile {
            drop_chance_percent: self.link.drop_chance_percent,
            latency_ms: self.link.latency_ms,
            jitter_ms: self.link.jitter_ms,
        }
    }

    pub fn plan_retry(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_millis(self.planner.plan_backoff_ms),
            timeout: Duration::from_millis(self.planner.plan_timeout_ms),
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            robot_max_speed: self.robot.max_speed,
            ipoint_radius: self.robot.ipoint_radius,
            destination_poll: Duration::from_millis(self.planner.destination_poll_ms),
            plan_retry: self.plan_retry(),
            subscriber_wait: Duration::from_millis(self.planner.subscriber_wait_ms),
        }
    }
}

/// `1 / rate` seconds. The rate must be positive and the period must be a
/// non-zero, representable [`Duration`].
fn rate_period(key: &str, rate: f64) -> PlannerResult<Duration> {
    match Duration::try_from_secs_f64(1.0 / rate) {
        Ok(period) if rate > 0.0 && !period.is_zero() => Ok(period),
        _ => Err(PlannerError::Configuration(format!(
            "{key} must be a positive rate with a non-zero period, got {rate}"
        ))),
    }
}

impl PointConfig {
    pub fn pose(&self) -> Pose {
        Pose::at(self.x, self.y, self.z)
    }
}
