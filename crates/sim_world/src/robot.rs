use std::sync::Arc;
use std::time::Duration;

use api::v1::{Point, Pose, PoseWithCovariance, Quaternion};
use api::{Bus, Topics};
use nalgebra::Vector2;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shortest interval between pose estimates.
const MIN_POSE_PERIOD: Duration = Duration::from_millis(1);

/// Diagonal of the 6x6 pose covariance reported with every estimate.
const POSITION_VARIANCE: f64 = 0.01;
const YAW_VARIANCE: f64 = 0.005;

#[derive(Debug, Clone)]
pub struct SimRobotConfig {
    pub namespace: String,
    pub start: Pose,
    /// m/s
    pub max_speed: f64,
    /// Interval between pose estimates, at least 1 ms.
    pub pose_period: Duration,
    pub topics: Topics,
}

/// Holonomic point robot. Drives straight at `max_speed` toward the last
/// goal it received and stops on it.
pub struct SimRobot {
    config: SimRobotConfig,
    position: Vector2<f64>,
    height: f64,
    yaw: f64,
    goal: Option<Vector2<f64>>,
}

impl SimRobot {
    pub fn new(config: SimRobotConfig) -> Self {
        let p = config.start.point();
        Self {
            position: Vector2::new(p.x, p.y),
            height: p.z,
            yaw: 0.0,
            goal: None,
            config,
        }
    }

    pub fn pose(&self) -> Pose {
        Pose {
            position: Some(Point::new(self.position.x, self.position.y, self.height)),
            orientation: Some(Quaternion::from_yaw(self.yaw)),
        }
    }

    pub fn has_goal(&self) -> bool {
        self.goal.is_some()
    }

    /// Replaces any goal in progress.
    pub fn set_goal(&mut self, goal: &Pose) {
        let g = goal.point();
        self.goal = Some(Vector2::new(g.x, g.y));
    }

    /// Advances the robot by `dt`.
    pub fn step(&mut self, dt: Duration) {
        let Some(goal) = self.goal else { return };
        let to_goal = goal - self.position;
        let remaining = to_goal.norm();
        let reach = self.config.max_speed * dt.as_secs_f64();

        if remaining <= reach {
            self.position = goal;
            self.goal = None;
        } else {
            self.yaw = to_goal.y.atan2(to_goal.x);
            self.position += to_goal * (reach / remaining);
        }
    }

    fn estimate(&self) -> PoseWithCovariance {
        let mut covariance = vec![0.0; 36];
        covariance[0] = POSITION_VARIANCE;
        covariance[7] = POSITION_VARIANCE;
        covariance[35] = YAW_VARIANCE;
        PoseWithCovariance {
            pose: Some(self.pose()),
            covariance,
            stamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Listens for goals and publishes a pose estimate every `pose_period` until
    /// shutdown.
    pub fn spawn(mut self, bus: Arc<Bus>, mut shutdown_rx: watch::Receiver<()>) -> JoinHandle<()> {
        let ns = self.config.namespace.clone();
        let pose_topic = self.config.topics.pose(&ns);
        let mut goals = bus.subscribe::<Pose>(&self.config.topics.goal(&ns));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.pose_period.max(MIN_POSE_PERIOD));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_tick = Instant::now();
            tracing::debug!(robot = %ns, "Simulated robot started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    goal = goals.recv() => {
                        let Some(goal) = goal else { break };
                        tracing::debug!(robot = %ns, x = goal.point().x, y = goal.point().y, "New goal");
                        self.set_goal(&goal);
                    }
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        self.step(now - last_tick);
                        last_tick = now;
                        bus.publish(&pose_topic, &self.estimate());
                    }
                }
            }
            tracing::debug!(robot = %ns, "Simulated robot stopped");
        })
    }
}
