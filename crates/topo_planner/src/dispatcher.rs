//! Assigns patrol paths to robots as they become READY.
//!
//! One dispatch cycle per queued robot, strictly one at a time:
//!
//! 1. wait until some destination other than the robot's afference is free;
//! 2. reserve the one with the highest idleness (random tie-break);
//! 3. estimate how long the robot needs to get there (best effort);
//! 4. compute the topological path and publish it, minus the source.
//!
//! The robot stays `temp_busy` for the whole cycle, so READY reports that
//! arrive meanwhile do not queue it a second time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use api::v1::{RobotTopopath, ToponavIpoint};
use api::{path_length, plan_with_retry, PathPlanner, RetryPolicy};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::graph::Path;
use crate::robots::{BusyGuard, Robot};
use crate::state::PlannerState;
use crate::{PlannerError, PlannerResult};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// m/s, used to turn a metric path length into an idleness estimate.
    pub robot_max_speed: f64,
    /// Goal tolerance handed to the planning capability.
    pub ipoint_radius: f64,
    /// Re-check period while no destination is available.
    pub destination_poll: Duration,
    pub plan_retry: RetryPolicy,
    /// How long to wait for the robot to subscribe to its path topic.
    pub subscriber_wait: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            robot_max_speed: 0.5,
            ipoint_radius: 0.5,
            destination_poll: Duration::from_millis(500),
            plan_retry: RetryPolicy::default(),
            subscriber_wait: Duration::from_secs(2),
        }
    }
}

/// A path handed to a robot.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub robot: String,
    pub source: String,
    pub destination: String,
    /// Waypoints after the source, ending at the destination.
    pub path: Path,
}

pub struct TaskDispatcher {
    config: DispatchConfig,
    state: Arc<PlannerState>,
    planner: Arc<dyn PathPlanner>,
    rng: Mutex<StdRng>,
    /// (source, destination) pairs already reported as unreachable.
    unreachable: Mutex<HashSet<(String, String)>>,
}

impl TaskDispatcher {
    pub fn new(
        config: DispatchConfig,
        state: Arc<PlannerState>,
        planner: Arc<dyn PathPlanner>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            state,
            planner,
            rng: Mutex::new(rng),
            unreachable: Mutex::new(HashSet::new()),
        }
    }

    /// Runs the dispatch loop on its own task until shutdown.
    pub fn spawn(self, shutdown_rx: watch::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown_rx).await })
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<()>) {
        tracing::info!("Task dispatcher started");
        loop {
            let robot = tokio::select! {
                _ = shutdown_rx.changed() => break,
                robot = self.state.robots.next_available() => robot,
            };
            let _busy = BusyGuard::new(&self.state.robots, robot.namespace.clone());

            tokio::select! {
                _ = shutdown_rx.changed() => break,
                outcome = self.dispatch_once(&robot) => match outcome {
                    Ok(_) => {}
                    Err(e @ PlannerError::NoPath { .. }) => {
                        tracing::debug!(robot = %robot.namespace, error = %e, "Dispatch cycle abandoned");
                    }
                    Err(e) => tracing::warn!(robot = %robot.namespace, error = %e, "Dispatch cycle abandoned"),
                }
            }
        }
        tracing::info!("Task dispatcher stopped");
    }

    /// One dispatch cycle for a robot already popped from the queue.
    pub async fn dispatch_once(&self, robot: &Robot) -> PlannerResult<Assignment> {
        let metrics = &self.state.metrics;
        let destinations = &self.state.destinations;
        metrics.dispatch_cycles_total.inc();

        let freed = destinations.release_held_by(&robot.namespace);
        if !freed.is_empty() {
            tracing::warn!(robot = %robot.namespace, ?freed, "Released reservations of an unfinished assignment");
        }

        let Some(source) = robot.afference.clone() else {
            metrics.abandon("no_afference");
            return Err(PlannerError::NoAfference(robot.namespace.clone()));
        };
        if destinations.get(&source).is_none() {
            metrics.abandon("unknown_afference");
            return Err(PlannerError::UnknownDestination(source));
        }

        let destination = loop {
            destinations
                .wait_for_destination(&source, self.config.destination_poll)
                .await;
            let chosen = {
                let mut rng = self.rng.lock();
                destinations.choose_destination_for(&source, &robot.namespace, &mut *rng)
            };
            if let Some(d) = chosen {
                break d;
            }
        };

        match self.estimate_idleness(&source, &destination).await {
            Ok((idleness, length)) => destinations.set_estimates(&destination, idleness, length)?,
            Err(e) => tracing::warn!(robot = %robot.namespace, %destination, error = %e, "Idleness estimate unavailable"),
        }

        let path = match self.state.graph.shortest_path(&source, &destination) {
            Ok(path) => path,
            Err(e) => {
                destinations.release(&destination)?;
                metrics.abandon("no_path");
                if self.unreachable.lock().insert((source.clone(), destination.clone())) {
                    tracing::warn!(robot = %robot.namespace, %source, %destination, error = %e, "Destination unreachable");
                }
                // The same destination is likely the most idle on the next
                // cycle too.
                tokio::time::sleep(self.config.destination_poll).await;
                return Err(e);
            }
        };
        let Some((_, remaining)) = path.split_first() else {
            destinations.release(&destination)?;
            metrics.abandon("no_path");
            return Err(PlannerError::NoPath {
                from: source,
                to: destination,
            });
        };

        let topopath = match self.build_topopath(remaining) {
            Ok(topopath) => topopath,
            Err(e) => {
                destinations.release(&destination)?;
                metrics.abandon("unposed_waypoint");
                return Err(e);
            }
        };

        self.publish_path(&robot.namespace, &topopath).await;
        self.state.robots.expect_ack(&robot.namespace, &destination);
        metrics.assignments_total.inc();

        tracing::info!(
            robot = %robot.namespace,
            color = %robot.color,
            %source,
            %destination,
            hops = remaining.len(),
            "Assigned destination"
        );

        Ok(Assignment {
            robot: robot.namespace.clone(),
            source,
            destination,
            path: remaining.to_vec(),
        })
    }

    /// Seconds a robot at max speed needs to drive from `source` to
    /// `destination`, and the metric path length. Rounded to 2 and 3
    /// decimals.
    pub async fn estimate_idleness(&self, source: &str, destination: &str) -> PlannerResult<(f64, f64)> {
        let pose_of = |name: &str| {
            self.state
                .destinations
                .pose(name)
                .ok_or_else(|| PlannerError::UnknownDestination(name.to_owned()))
        };
        let start = pose_of(source)?;
        let goal = pose_of(destination)?;

        let plan = plan_with_retry(
            self.planner.as_ref(),
            &start,
            &goal,
            self.config.ipoint_radius,
            &self.config.plan_retry,
        )
        .await?;

        let length = path_length(&plan);
        let idleness = round_to(length / self.config.robot_max_speed, 2);
        Ok((idleness, round_to(length, 3)))
    }

    fn build_topopath(&self, waypoints: &[String]) -> PlannerResult<RobotTopopath> {
        let path = waypoints
            .iter()
            .map(|name| -> PlannerResult<ToponavIpoint> {
                let pose = self
                    .state
                    .destinations
                    .pose(name)
                    .or_else(|| self.state.graph.pose(name))
                    .ok_or_else(|| PlannerError::UnknownWaypoint(name.clone()))?;
                Ok(ToponavIpoint {
                    pose: Some(pose),
                    name: name.clone(),
                })
            })
            .collect::<PlannerResult<Vec<_>>>()?;
        Ok(RobotTopopath { path })
    }

    async fn publish_path(&self, namespace: &str, topopath: &RobotTopopath) {
        let topic = self.state.topics.robot_topopath(namespace);
        if !self
            .state
            .bus
            .wait_for_subscribers(&topic, self.config.subscriber_wait)
            .await
        {
            tracing::warn!(robot = %namespace, %topic, "No subscriber on path topic, publishing anyway");
        }
        if !self.state.bus.publish(&topic, topopath) {
            tracing::warn!(robot = %namespace, %topic, "Path was dropped by the link");
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destinations::DestinationRegistry;
    use crate::fixtures::{office_interest_points, OFFICE};
    use crate::graph::TopologyGraph;
    use crate::metrics::Metrics;
    use crate::robots::RobotRegistry;
    use api::v1::{Pose, RobotState, RobotStatus};
    use api::{Bus, PlanError, Topics};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Straight-line planner that can be switched off.
    #[derive(Default)]
    struct StraightLine {
        offline: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PathPlanner for StraightLine {
        async fn make_plan(&self, start: &Pose, goal: &Pose, _tolerance: f64) -> Result<Vec<Pose>, PlanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline {
                return Err(PlanError::Unavailable);
            }
            Ok(vec![*start, *goal])
        }
    }

    fn state_with(graph: TopologyGraph) -> Arc<PlannerState> {
        let ips = office_interest_points();
        let robots = RobotRegistry::new(vec![Robot::new("/robot_1", "red"), Robot::new("/robot_2", "blue")]);
        PlannerState::new(
            graph,
            DestinationRegistry::new(&ips),
            robots,
            Bus::perfect(),
            Topics::default(),
            Arc::new(Metrics::new()),
        )
    }

    fn office_state() -> Arc<PlannerState> {
        state_with(TopologyGraph::from_adjlist(OFFICE).unwrap())
    }

    fn config() -> DispatchConfig {
        DispatchConfig {
            subscriber_wait: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn ready_at(state: &PlannerState, ns: &str, afference: &str) -> Robot {
        let mut report = RobotState {
            robot_name: ns.into(),
            afference: Some(afference.into()),
            ..Default::default()
        };
        report.set_state(RobotStatus::Ready);
        state.robots.ingest(&report);
        state.robots.pop_available().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_path_without_source() {
        let state = office_state();
        let mut sub = state
            .bus
            .subscribe::<RobotTopopath>(&state.topics.robot_topopath("/robot_1"));
        let dispatcher = TaskDispatcher::new(config(), state.clone(), Arc::new(StraightLine::default()), Some(1));

        // Make WayPoint4 the single most idle destination.
        tokio::time::advance(Duration::from_secs(30)).await;
        let visitor = Robot::new("/robot_2", "blue");
        let others: Vec<Robot> = ["WayPoint1", "WayPoint2", "WayPoint3", "WayPoint5", "WayPoint6", "WayPoint7"]
            .iter()
            .map(|w| {
                let mut r = visitor.clone();
                r.latest_goal = Some((*w).to_owned());
                r
            })
            .collect();
        state.destinations.refresh(&others);
        tokio::time::advance(Duration::from_secs(1)).await;

        let robot = ready_at(&state, "/robot_1", "WayPoint2");
        let assignment = dispatcher.dispatch_once(&robot).await.unwrap();
        assert_eq!(assignment.destination, "WayPoint4");
        assert_eq!(assignment.path, ["WayPoint3", "WayPoint4"]);

        let topopath = sub.recv().await.unwrap();
        let names: Vec<&str> = topopath.path.iter().map(|ip| ip.name.as_str()).collect();
        assert_eq!(names, ["WayPoint3", "WayPoint4"]);
        assert!(topopath.path.iter().all(|ip| ip.pose.is_some()));

        let d = state.destinations.get("WayPoint4").unwrap();
        assert!(d.reserved);
        // WayPoint2 (1,1) to WayPoint4 (2,2) in a straight line at 0.5 m/s.
        assert_eq!(d.estimated_path_length, 1.414);
        assert_eq!(d.estimated_idleness, 2.83);
        assert!(state.robots.is_awaiting_ack("/robot_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn two_robots_never_share_a_destination() {
        let state = office_state();
        let dispatcher = TaskDispatcher::new(config(), state.clone(), Arc::new(StraightLine::default()), Some(7));

        let first = ready_at(&state, "/robot_1", "WayPoint1");
        let second = ready_at(&state, "/robot_2", "WayPoint1");
        let a = dispatcher.dispatch_once(&first).await.unwrap();
        let b = dispatcher.dispatch_once(&second).await.unwrap();

        assert_ne!(a.destination, b.destination);
        assert_ne!(a.destination, "WayPoint1");
        assert_ne!(b.destination, "WayPoint1");
        assert_eq!(state.metrics.assignments_total.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_destination_is_released() {
        let mut graph = TopologyGraph::from_adjlist(OFFICE).unwrap();
        graph.add_waypoint("Island");
        let mut ips = office_interest_points();
        ips.push(ToponavIpoint {
            pose: Some(Pose::at(9.0, 9.0, 0.0)),
            name: "Island".into(),
        });
        let state = PlannerState::new(
            graph,
            DestinationRegistry::new(&ips),
            RobotRegistry::new(vec![Robot::new("/robot_1", "red")]),
            Bus::perfect(),
            Topics::default(),
            Arc::new(Metrics::new()),
        );
        // Only the island is free.
        let names: Vec<String> = state.destinations.names();
        for name in names.iter().filter(|n| n.as_str() != "Island") {
            state.destinations.reserve(name).unwrap();
        }

        let dispatcher = TaskDispatcher::new(config(), state.clone(), Arc::new(StraightLine::default()), Some(3));
        let robot = ready_at(&state, "/robot_1", "WayPoint1");
        let err = dispatcher.dispatch_once(&robot).await.unwrap_err();

        assert!(matches!(err, PlannerError::NoPath { .. }));
        assert!(!state.destinations.get("Island").unwrap().reserved);
        assert!(!state.robots.is_awaiting_ack("/robot_1"));

        // Retrying is paced by the poll interval and reported once.
        drop(BusyGuard::new(&state.robots, "/robot_1"));
        let robot = ready_at(&state, "/robot_1", "WayPoint1");
        let started = tokio::time::Instant::now();
        let err = dispatcher.dispatch_once(&robot).await.unwrap_err();
        assert!(matches!(err, PlannerError::NoPath { .. }));
        assert!(started.elapsed() >= config().destination_poll);
        assert_eq!(dispatcher.unreachable.lock().len(), 1);
        assert_eq!(
            state
                .metrics
                .abandoned_cycles_total
                .with_label_values(&["no_path"])
                .get(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_departure_does_not_double_book() {
        let state = PlannerState::new(
            TopologyGraph::from_adjlist(OFFICE).unwrap(),
            DestinationRegistry::new(&office_interest_points()),
            RobotRegistry::new(
                ["/robot_1", "/robot_2", "/robot_3", "/robot_4"]
                    .iter()
                    .map(|ns| Robot::new(ns, "red"))
                    .collect(),
            ),
            Bus::perfect(),
            Topics::default(),
            Arc::new(Metrics::new()),
        );
        for name in ["WayPoint3", "WayPoint4", "WayPoint6", "WayPoint7"] {
            state.destinations.reserve(name).unwrap();
        }

        // robot_2 left WayPoint2 and has not reported since; robot_3 is on
        // its way to WayPoint5.
        let mut left = RobotState {
            robot_name: "/robot_2".into(),
            afference: Some("WayPoint2".into()),
            latest_goal: Some("WayPoint2".into()),
            ..Default::default()
        };
        left.set_state(RobotStatus::Busy);
        state.robots.ingest(&left);
        let mut heading = RobotState {
            robot_name: "/robot_3".into(),
            afference: Some("WayPoint2".into()),
            final_goal: Some("WayPoint5".into()),
            ..Default::default()
        };
        heading.set_state(RobotStatus::Busy);
        state.robots.ingest(&heading);
        state.destinations.refresh(&state.robots.snapshot());

        let dispatcher = TaskDispatcher::new(config(), state.clone(), Arc::new(StraightLine::default()), Some(13));
        let first = ready_at(&state, "/robot_1", "WayPoint1");
        let a = dispatcher.dispatch_once(&first).await.unwrap();
        assert_eq!(a.destination, "WayPoint2");

        state.destinations.refresh(&state.robots.snapshot());
        let fourth = ready_at(&state, "/robot_4", "WayPoint1");
        let second = tokio::time::timeout(Duration::from_secs(5), dispatcher.dispatch_once(&fourth)).await;
        assert!(second.is_err(), "WayPoint2 was handed out twice");
        assert!(state.destinations.get("WayPoint2").unwrap().reserved);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_afference_abandons_the_cycle() {
        let state = office_state();
        let dispatcher = TaskDispatcher::new(config(), state.clone(), Arc::new(StraightLine::default()), Some(3));
        let robot = Robot::new("/robot_1", "red");

        let err = dispatcher.dispatch_once(&robot).await.unwrap_err();
        assert!(matches!(err, PlannerError::NoAfference(_)));
        assert!(state.destinations.snapshot().iter().all(|d| d.available));
    }

    #[tokio::test(start_paused = true)]
    async fn planner_outage_keeps_estimates_unset() {
        let state = office_state();
        let planner = Arc::new(StraightLine {
            offline: true,
            ..Default::default()
        });
        let mut cfg = config();
        cfg.plan_retry = RetryPolicy {
            backoff: Duration::from_millis(100),
            timeout: Duration::from_secs(1),
        };
        let dispatcher = TaskDispatcher::new(cfg, state.clone(), planner.clone(), Some(11));

        let robot = ready_at(&state, "/robot_1", "WayPoint1");
        let assignment = dispatcher.dispatch_once(&robot).await.unwrap();

        let d = state.destinations.get(&assignment.destination).unwrap();
        assert_eq!(d.estimated_idleness, crate::destinations::UNSET_ESTIMATE);
        assert!(planner.calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn redispatch_releases_a_lost_assignment() {
        let state = office_state();
        let dispatcher = TaskDispatcher::new(config(), state.clone(), Arc::new(StraightLine::default()), Some(5));

        let robot = ready_at(&state, "/robot_1", "WayPoint1");
        let lost = dispatcher.dispatch_once(&robot).await.unwrap();
        drop(BusyGuard::new(&state.robots, "/robot_1"));

        // The path never arrived; the robot keeps reporting READY.
        tokio::time::advance(Duration::from_secs(10)).await;
        let robot = ready_at(&state, "/robot_1", "WayPoint1");
        let retry = dispatcher.dispatch_once(&robot).await.unwrap();

        let held: Vec<String> = state
            .destinations
            .names()
            .into_iter()
            .filter(|n| state.destinations.get(n).unwrap().reserved)
            .collect();
        assert_eq!(held, vec![retry.destination.clone()]);
        assert!(lost.destination == retry.destination || !state.destinations.get(&lost.destination).unwrap().reserved);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_dispatches_queued_robots() {
        let state = office_state();
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = TaskDispatcher::new(config(), state.clone(), Arc::new(StraightLine::default()), Some(9))
            .spawn(shutdown_rx);

        let mut sub = state
            .bus
            .subscribe::<RobotTopopath>(&state.topics.robot_topopath("/robot_2"));
        let mut report = RobotState {
            robot_name: "/robot_2".into(),
            afference: Some("WayPoint6".into()),
            ..Default::default()
        };
        report.set_state(RobotStatus::Ready);
        state.robots.ingest(&report);

        let topopath = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!topopath.path.is_empty());
        assert_ne!(topopath.path[0].name, "WayPoint6");

        drop(shutdown_tx);
        handle.await.unwrap();
        assert!(!state.robots.is_temp_busy("/robot_2"));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(2.828_427, 2), 2.83);
        assert_eq!(round_to(1.414_213_5, 3), 1.414);
    }
}
