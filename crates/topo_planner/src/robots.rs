//! Planner-side view of the fleet.
//!
//! Robots report their full state several times a second. Reports may be
//! late, duplicated or lost; every field is last-write-wins. The only
//! ordered state is the `available_robots` queue together with the set of
//! robots currently being dispatched (`temp_busy`), and both live under the
//! same lock so a stale READY report can never queue a robot twice.
//!
//! After a path is published the robot is held in an acknowledgement window:
//! READY reports are absorbed until one shows the robot busy or heading for
//! the assigned destination, or until the window expires (path lost).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use api::topics::normalize_namespace;
use api::v1::{RobotState, RobotStatus};
use api::{Bus, Topics};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::metrics::Metrics;

#[derive(Debug, Clone, PartialEq)]
pub struct Robot {
    pub namespace: String,
    pub color: String,
    pub state: RobotStatus,
    pub current_goal: Option<String>,
    pub latest_goal: Option<String>,
    pub final_goal: Option<String>,
    pub afference: Option<String>,
    pub distance: f64,
}

impl Robot {
    /// A robot that has not reported yet. It is not queued until its first
    /// READY report arrives. `color` is either a name or an `"r g b a"`
    /// string (see [`color_name`]).
    pub fn new(namespace: &str, color: impl Into<String>) -> Self {
        Self {
            namespace: normalize_namespace(namespace),
            color: color_name(color.into()),
            state: RobotStatus::Ready,
            current_goal: None,
            latest_goal: None,
            final_goal: None,
            afference: None,
            distance: 0.0,
        }
    }

    fn apply(&mut self, report: &RobotState) {
        self.state = report.state();
        self.current_goal = report.current_goal.clone();
        self.latest_goal = report.latest_goal.clone();
        self.final_goal = report.final_goal.clone();
        self.afference = report.afference.clone();
        self.distance = report.distance;
    }
}

/// Names an `"r g b a"` colour with channels in `[0, 1]`. Each channel is
/// truncated, so only the eight corner colours have names; anything else,
/// including a plain name, is returned unchanged.
pub fn color_name(color: String) -> String {
    let channels: Result<Vec<f64>, _> = color.trim_matches('\'').split_whitespace().map(str::parse).collect();
    let name = match channels.as_deref() {
        Ok([r, g, b, ..]) => match (r.trunc() as u8, g.trunc() as u8, b.trunc() as u8) {
            (0, 0, 0) => "black",
            (1, 0, 0) => "red",
            (0, 1, 0) => "lime",
            (0, 0, 1) => "blue",
            (1, 1, 0) => "yellow",
            (0, 1, 1) => "aqua",
            (1, 0, 1) => "fuchsia",
            (1, 1, 1) => "white",
            _ => return color,
        },
        _ => return color,
    };
    name.to_owned()
}

/// Outcome of [`RobotRegistry::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// READY report that put the robot in the dispatch queue.
    Queued,
    /// Fields updated, queue membership unchanged.
    Absorbed,
    /// No robot with that namespace.
    Unknown,
}

struct Fleet {
    robots: Vec<Robot>,
    available: VecDeque<String>,
    temp_busy: HashSet<String>,
    /// namespace -> (assigned destination, window deadline)
    awaiting_ack: HashMap<String, (String, Instant)>,
}

pub struct RobotRegistry {
    fleet: Mutex<Fleet>,
    queued: Notify,
    ack_timeout: Duration,
}

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

impl RobotRegistry {
    pub fn new(robots: Vec<Robot>) -> Self {
        Self {
            fleet: Mutex::new(Fleet {
                robots,
                available: VecDeque::new(),
                temp_busy: HashSet::new(),
                awaiting_ack: HashMap::new(),
            }),
            queued: Notify::new(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.fleet.lock().robots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fleet.lock().robots.is_empty()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.fleet.lock().robots.iter().map(|r| r.namespace.clone()).collect()
    }

    pub fn get(&self, namespace: &str) -> Option<Robot> {
        let ns = normalize_namespace(namespace);
        self.fleet.lock().robots.iter().find(|r| r.namespace == ns).cloned()
    }

    /// Applies a state report to the matching robot.
    pub fn ingest(&self, report: &RobotState) -> Ingest {
        let ns = normalize_namespace(&report.robot_name);
        let outcome = {
            let mut fleet = self.fleet.lock();
            let Fleet {
                robots,
                available,
                temp_busy,
                awaiting_ack,
            } = &mut *fleet;

            let Some(robot) = robots.iter_mut().find(|r| r.namespace == ns) else {
                return Ingest::Unknown;
            };
            robot.apply(report);

            let mut held = false;
            if let Some((destination, deadline)) = awaiting_ack.get(&ns).cloned() {
                if robot.state == RobotStatus::Busy
                    || robot.final_goal.as_deref() == Some(destination.as_str())
                {
                    awaiting_ack.remove(&ns);
                } else if Instant::now() < deadline {
                    held = true;
                } else {
                    tracing::warn!(robot = %ns, destination = %destination, "Assignment was not acknowledged");
                    awaiting_ack.remove(&ns);
                }
            }

            if !held
                && robot.state == RobotStatus::Ready
                && !temp_busy.contains(&ns)
                && !available.iter().any(|queued| *queued == ns)
            {
                available.push_back(ns.clone());
                Ingest::Queued
            } else {
                Ingest::Absorbed
            }
        };

        if outcome == Ingest::Queued {
            tracing::info!(robot = %ns, "Robot is available");
            self.queued.notify_one();
        }
        outcome
    }

    /// Pops the oldest available robot and marks it `temp_busy`.
    pub fn pop_available(&self) -> Option<Robot> {
        let mut fleet = self.fleet.lock();
        let ns = fleet.available.pop_front()?;
        fleet.temp_busy.insert(ns.clone());
        fleet.robots.iter().find(|r| r.namespace == ns).cloned()
    }

    /// Suspends until a robot is available, then pops it like
    /// [`pop_available`](Self::pop_available).
    pub async fn next_available(&self) -> Robot {
        loop {
            let notified = self.queued.notified();
            if let Some(robot) = self.pop_available() {
                return robot;
            }
            notified.await;
        }
    }

    /// Opens the acknowledgement window for a freshly published path.
    pub fn expect_ack(&self, namespace: &str, destination: &str) {
        let deadline = Instant::now() + self.ack_timeout;
        self.fleet
            .lock()
            .awaiting_ack
            .insert(namespace.to_owned(), (destination.to_owned(), deadline));
    }

    pub fn is_awaiting_ack(&self, namespace: &str) -> bool {
        self.fleet.lock().awaiting_ack.contains_key(namespace)
    }

    pub fn release_temp_busy(&self, namespace: &str) {
        self.fleet.lock().temp_busy.remove(namespace);
    }

    pub fn is_temp_busy(&self, namespace: &str) -> bool {
        self.fleet.lock().temp_busy.contains(namespace)
    }

    pub fn queued(&self) -> Vec<String> {
        self.fleet.lock().available.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<Robot> {
        self.fleet.lock().robots.clone()
    }
}

/// Clears a robot's `temp_busy` mark when the dispatch cycle that set it
/// ends, however it ends.
pub struct BusyGuard<'a> {
    registry: &'a RobotRegistry,
    namespace: String,
}

impl<'a> BusyGuard<'a> {
    pub fn new(registry: &'a RobotRegistry, namespace: impl Into<String>) -> Self {
        Self {
            registry,
            namespace: namespace.into(),
        }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.registry.release_temp_busy(&self.namespace);
    }
}

/// Subscribes to every robot's state topic and feeds the registry until
/// shutdown. One task per robot.
pub async fn run_report_listener(
    bus: Arc<Bus>,
    topics: Topics,
    registry: Arc<RobotRegistry>,
    metrics: Option<Arc<Metrics>>,
    shutdown_rx: watch::Receiver<()>,
) {
    let mut listeners = Vec::new();

    for ns in registry.namespaces() {
        let mut sub = bus.subscribe::<RobotState>(&topics.robot_state(&ns));
        let registry = registry.clone();
        let metrics = metrics.clone();
        let mut shutdown_rx = shutdown_rx.clone();

        listeners.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    report = sub.recv() => {
                        let Some(report) = report else { break };
                        if let Some(m) = &metrics {
                            m.reports_ingested_total.inc();
                        }
                        if registry.ingest(&report) == Ingest::Unknown {
                            tracing::warn!(robot = %report.robot_name, topic = %sub.topic(), "Report from unknown robot");
                        }
                    }
                }
            }
            tracing::debug!(robot = %ns, "Report listener stopped");
        }));
    }

    futures::future::join_all(listeners).await;
}
