//! Destination availability, reservation and idleness.
//!
//! The registry owns every [`Destination`] behind one mutex. Reservation and
//! selection happen under that lock, so two dispatch cycles can never hold
//! the same destination. Availability is recomputed on a fixed cadence by
//! [`run_availability_sweep`] from the robots' last reported goals.

use std::sync::Arc;
use std::time::Duration;

use api::v1::{DestinationDebug, Pose, ToponavIpoint};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::robots::{Robot, RobotRegistry};
use crate::{PlannerError, PlannerResult};

/// Placeholder for estimates that have not been computed yet.
pub const UNSET_ESTIMATE: f64 = -1.0;

#[derive(Debug, Clone)]
pub struct Destination {
    pub name: String,
    pub pose: Pose,
    pub available: bool,
    pub last_visited_at: Instant,
    pub reserved: bool,
    /// Seconds a robot at max speed needs to get here from where it was sent.
    pub estimated_idleness: f64,
    pub estimated_path_length: f64,
    /// Robot the reservation was made for, when known.
    owner: Option<String>,
    /// Idleness, in seconds, observed at each visit.
    visits: Vec<f64>,
    /// A robot's latest goal named this destination at the previous sweep.
    dwelling: bool,
}

impl Destination {
    pub fn new(name: impl Into<String>, pose: Pose, now: Instant) -> Self {
        Self {
            name: name.into(),
            pose,
            available: true,
            last_visited_at: now,
            reserved: false,
            estimated_idleness: UNSET_ESTIMATE,
            estimated_path_length: UNSET_ESTIMATE,
            owner: None,
            visits: Vec::new(),
            dwelling: false,
        }
    }

    pub fn idleness(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_visited_at)
    }

    fn selectable(&self, source: &str) -> bool {
        self.available && !self.reserved && self.name != source
    }

    fn unreserve(&mut self) {
        self.reserved = false;
        self.owner = None;
    }
}

/// Idleness history of one destination, collected for the shutdown dump.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationStats {
    pub name: String,
    pub samples: Vec<f64>,
    pub final_idleness: f64,
}

pub struct DestinationRegistry {
    inner: Mutex<Vec<Destination>>,
    changed: Notify,
}

impl DestinationRegistry {
    /// One destination per interest point, all available and just visited.
    pub fn new(interest_points: &[ToponavIpoint]) -> Self {
        let now = Instant::now();
        let destinations = interest_points
            .iter()
            .map(|ip| Destination::new(ip.name.clone(), ip.pose.unwrap_or_default(), now))
            .collect();
        Self {
            inner: Mutex::new(destinations),
            changed: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.lock().iter().map(|d| d.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Destination> {
        self.inner.lock().iter().find(|d| d.name == name).cloned()
    }

    pub fn pose(&self, name: &str) -> Option<Pose> {
        self.inner.lock().iter().find(|d| d.name == name).map(|d| d.pose)
    }

    /// Recomputes availability from the robots' goals.
    ///
    /// Per destination, in priority order:
    /// 1. some robot's final goal names it: not available;
    /// 2. else some robot's latest goal names it: available, idleness reset,
    ///    reservation cleared unless it is owned by a robot other than the
    ///    ones whose latest goal names it;
    /// 3. otherwise left unchanged.
    pub fn refresh(&self, robots: &[Robot]) {
        let now = Instant::now();
        let mut wake = false;

        {
            let mut destinations = self.inner.lock();
            for d in destinations.iter_mut() {
                let heading_here = robots.iter().any(|r| r.final_goal.as_deref() == Some(d.name.as_str()));
                if heading_here {
                    d.available = false;
                    d.dwelling = false;
                    continue;
                }

                let visitors: Vec<&str> = robots
                    .iter()
                    .filter(|r| r.latest_goal.as_deref() == Some(d.name.as_str()))
                    .map(|r| r.namespace.as_str())
                    .collect();
                if !visitors.is_empty() {
                    if !d.dwelling {
                        let idleness = d.idleness(now).as_secs_f64();
                        d.visits.push(idleness);
                        tracing::debug!(destination = %d.name, idleness, "Destination visited");
                    }
                    // An owned reservation is only fulfilled by its owner
                    // arriving; a robot that merely left from here does not
                    // free it.
                    let fulfilled = match d.owner.as_deref() {
                        Some(owner) => visitors.contains(&owner),
                        None => true,
                    };
                    if !d.available || (d.reserved && fulfilled) {
                        wake = true;
                    }
                    d.available = true;
                    if fulfilled {
                        d.unreserve();
                    }
                    d.last_visited_at = now;
                    d.dwelling = true;
                } else {
                    d.dwelling = false;
                }
            }
        }

        if wake {
            self.changed.notify_waiters();
        }
    }

    pub fn idleness(&self, name: &str) -> PlannerResult<Duration> {
        let now = Instant::now();
        self.inner
            .lock()
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.idleness(now))
            .ok_or_else(|| PlannerError::UnknownDestination(name.to_owned()))
    }

    pub fn reserve(&self, name: &str) -> PlannerResult<()> {
        let mut destinations = self.inner.lock();
        let d = destinations
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| PlannerError::UnknownDestination(name.to_owned()))?;
        if d.reserved {
            return Err(PlannerError::AlreadyReserved(name.to_owned()));
        }
        d.reserved = true;
        Ok(())
    }

    pub fn release(&self, name: &str) -> PlannerResult<()> {
        {
            let mut destinations = self.inner.lock();
            let d = destinations
                .iter_mut()
                .find(|d| d.name == name)
                .ok_or_else(|| PlannerError::UnknownDestination(name.to_owned()))?;
            d.unreserve();
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Drops every reservation made for `robot`. Returns the destinations
    /// that were freed.
    pub fn release_held_by(&self, robot: &str) -> Vec<String> {
        let freed: Vec<String> = {
            let mut destinations = self.inner.lock();
            destinations
                .iter_mut()
                .filter(|d| d.reserved && d.owner.as_deref() == Some(robot))
                .map(|d| {
                    d.unreserve();
                    d.name.clone()
                })
                .collect()
        };
        if !freed.is_empty() {
            self.changed.notify_waiters();
        }
        freed
    }

    /// Some destination other than `source` is available and unreserved.
    pub fn has_destination(&self, source: &str) -> bool {
        self.inner.lock().iter().any(|d| d.selectable(source))
    }

    /// Picks and reserves the next destination for a robot at `source`.
    ///
    /// Candidates are the available, unreserved destinations other than
    /// `source`; among those with the highest idleness one is drawn uniformly
    /// from `rng`. Returns `None` when there is no candidate.
    pub fn choose_destination<R: Rng + ?Sized>(&self, source: &str, rng: &mut R) -> Option<String> {
        self.choose(source, None, rng)
    }

    /// [`choose_destination`](Self::choose_destination), recording `robot`
    /// as the owner of the reservation.
    pub fn choose_destination_for<R: Rng + ?Sized>(
        &self,
        source: &str,
        robot: &str,
        rng: &mut R,
    ) -> Option<String> {
        self.choose(source, Some(robot), rng)
    }

    fn choose<R: Rng + ?Sized>(&self, source: &str, owner: Option<&str>, rng: &mut R) -> Option<String> {
        let now = Instant::now();
        let mut destinations = self.inner.lock();

        let max_idleness = destinations
            .iter()
            .filter(|d| d.selectable(source))
            .map(|d| d.idleness(now))
            .max()?;

        let best: Vec<usize> = destinations
            .iter()
            .enumerate()
            .filter(|(_, d)| d.selectable(source) && d.idleness(now) == max_idleness)
            .map(|(i, _)| i)
            .collect();

        let &chosen = best.choose(rng)?;
        let d = &mut destinations[chosen];
        d.reserved = true;
        d.owner = owner.map(str::to_owned);
        Some(d.name.clone())
    }

    /// Suspends until [`has_destination`](Self::has_destination) holds.
    ///
    /// Woken by sweeps and releases that free a destination; the condition is
    /// also re-checked every `poll` in case a wake-up was missed.
    pub async fn wait_for_destination(&self, source: &str, poll: Duration) {
        loop {
            let notified = self.changed.notified();
            if self.has_destination(source) {
                return;
            }
            tracing::trace!(source, "No destination available, waiting");
            let _ = tokio::time::timeout(poll, notified).await;
        }
    }

    pub fn set_estimates(&self, name: &str, idleness_secs: f64, path_length: f64) -> PlannerResult<()> {
        let mut destinations = self.inner.lock();
        let d = destinations
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| PlannerError::UnknownDestination(name.to_owned()))?;
        d.estimated_idleness = idleness_secs;
        d.estimated_path_length = path_length;
        Ok(())
    }

    /// Telemetry records for every destination.
    pub fn snapshot(&self) -> Vec<DestinationDebug> {
        let now = Instant::now();
        self.inner
            .lock()
            .iter()
            .map(|d| DestinationDebug {
                name: d.name.clone(),
                available: d.available,
                idleness: d.idleness(now).as_secs_f64(),
            })
            .collect()
    }

    pub fn statistics(&self) -> Vec<DestinationStats> {
        let now = Instant::now();
        self.inner
            .lock()
            .iter()
            .map(|d| DestinationStats {
                name: d.name.clone(),
                samples: d.visits.clone(),
                final_idleness: d.idleness(now).as_secs_f64(),
            })
            .collect()
    }
}

/// Re-derives destination availability from the robot registry every
/// `period` until shutdown.
pub async fn run_availability_sweep(
    destinations: Arc<DestinationRegistry>,
    robots: Arc<RobotRegistry>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(period = ?period, "Availability sweep started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => destinations.refresh(&robots.snapshot()),
        }
    }
    tracing::info!("Availability sweep stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{interest_points, robot};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn registry(names: &[&str]) -> DestinationRegistry {
        DestinationRegistry::new(&interest_points(names))
    }

    #[tokio::test(start_paused = true)]
    async fn starts_available_and_unreserved() {
        let reg = registry(&["D1", "D2"]);
        let d = reg.get("D1").unwrap();
        assert!(d.available);
        assert!(!d.reserved);
        assert_eq!(d.estimated_idleness, UNSET_ESTIMATE);
        assert_eq!(reg.idleness("D1").unwrap(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn final_goal_makes_unavailable() {
        let reg = registry(&["D1", "D2"]);
        let mut r = robot("/robot_1");
        r.final_goal = Some("D2".into());
        reg.refresh(&[r]);
        assert!(reg.get("D1").unwrap().available);
        assert!(!reg.get("D2").unwrap().available);
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_c_final_goal_beats_stale_latest_goal() {
        let reg = registry(&["WayPoint1", "WayPoint3"]);
        reg.reserve("WayPoint3").unwrap();

        let mut heading = robot("/robot_1");
        heading.final_goal = Some("WayPoint3".into());
        let mut stale = robot("/robot_2");
        stale.latest_goal = Some("WayPoint3".into());

        reg.refresh(&[stale, heading]);
        let d = reg.get("WayPoint3").unwrap();
        assert!(!d.available);
        assert!(d.reserved, "reservation must survive while a robot is heading there");
    }

    #[tokio::test(start_paused = true)]
    async fn latest_goal_frees_and_clears_reservation() {
        let reg = registry(&["D1", "D2"]);
        let mut r = robot("/robot_1");
        r.final_goal = Some("D2".into());
        reg.reserve("D2").unwrap();
        reg.refresh(std::slice::from_ref(&r));
        assert!(!reg.get("D2").unwrap().available);

        r.final_goal = None;
        r.latest_goal = Some("D2".into());
        reg.refresh(&[r]);
        let d = reg.get("D2").unwrap();
        assert!(d.available);
        assert!(!d.reserved);
    }

    #[tokio::test(start_paused = true)]
    async fn untouched_destinations_keep_their_state() {
        let reg = registry(&["D1", "D2"]);
        let mut r = robot("/robot_1");
        r.final_goal = Some("D1".into());
        reg.refresh(&[r]);
        // Nobody mentions D1 any more; it stays unavailable until visited.
        reg.refresh(&[robot("/robot_1")]);
        assert!(!reg.get("D1").unwrap().available);
    }

    #[tokio::test(start_paused = true)]
    async fn idleness_is_monotonic_while_unvisited() {
        let reg = registry(&["D1", "D2"]);
        let mut other = robot("/robot_1");
        other.latest_goal = Some("D2".into());

        let mut last = reg.idleness("D1").unwrap();
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(700)).await;
            reg.refresh(std::slice::from_ref(&other));
            let now = reg.idleness("D1").unwrap();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn idleness_resets_on_visit() {
        let reg = registry(&["D1", "D2"]);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(reg.idleness("D1").unwrap(), Duration::from_secs(10));

        let mut r = robot("/robot_1");
        r.latest_goal = Some("D1".into());
        reg.refresh(std::slice::from_ref(&r));
        assert_eq!(reg.idleness("D1").unwrap(), Duration::ZERO);
        assert_eq!(reg.idleness("D2").unwrap(), Duration::from_secs(10));

        // Dwelling keeps idleness at zero but records a single visit.
        tokio::time::advance(Duration::from_secs(3)).await;
        reg.refresh(std::slice::from_ref(&r));
        let stats = reg.statistics();
        let d1 = stats.iter().find(|s| s.name == "D1").unwrap();
        assert_eq!(d1.samples, vec![10.0]);
        assert_eq!(d1.final_idleness, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn reservation_is_exclusive() {
        let reg = registry(&["D1"]);
        reg.reserve("D1").unwrap();
        assert!(matches!(reg.reserve("D1"), Err(PlannerError::AlreadyReserved(n)) if n == "D1"));
        reg.release("D1").unwrap();
        reg.reserve("D1").unwrap();
        assert!(matches!(reg.reserve("Nowhere"), Err(PlannerError::UnknownDestination(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_b_highest_idleness_wins() {
        let reg = registry(&["D0", "D1", "D2"]);
        // D1 idles for 10 s, D2 was visited 5 s ago.
        tokio::time::advance(Duration::from_secs(5)).await;
        let mut r = robot("/robot_2");
        r.latest_goal = Some("D2".into());
        reg.refresh(&[r]);
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(reg.idleness("D1").unwrap(), Duration::from_secs(10));
        assert_eq!(reg.idleness("D2").unwrap(), Duration::from_secs(5));

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert_eq!(reg.choose_destination("D0", &mut rng).as_deref(), Some("D1"));
            reg.release("D1").unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_chooses_the_source() {
        let reg = registry(&["D1", "D2", "D3"]);
        tokio::time::advance(Duration::from_secs(1)).await;
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let chosen = reg.choose_destination("D2", &mut rng).unwrap();
            assert_ne!(chosen, "D2");
            reg.release(&chosen).unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn chosen_destination_is_reserved() {
        let reg = registry(&["D1", "D2", "D3"]);
        let mut rng = StdRng::seed_from_u64(1);
        let a = reg.choose_destination("D1", &mut rng).unwrap();
        let b = reg.choose_destination("D1", &mut rng).unwrap();
        assert_ne!(a, b);
        assert!(reg.get(&a).unwrap().reserved);
        assert!(reg.choose_destination("D1", &mut rng).is_none());
        assert!(!reg.has_destination("D1"));
    }

    #[tokio::test(start_paused = true)]
    async fn reservations_are_released_by_owner() {
        let reg = registry(&["D0", "D1", "D2"]);
        let mut rng = StdRng::seed_from_u64(5);
        let mine = reg.choose_destination_for("D0", "/robot_1", &mut rng).unwrap();
        let theirs = reg.choose_destination_for("D0", "/robot_2", &mut rng).unwrap();

        assert_eq!(reg.release_held_by("/robot_1"), vec![mine.clone()]);
        assert!(!reg.get(&mine).unwrap().reserved);
        assert!(reg.get(&theirs).unwrap().reserved);
        assert!(reg.release_held_by("/robot_1").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn departed_robot_keeps_anothers_reservation() {
        let reg = registry(&["D0", "D1", "D2"]);
        let mut leaving = robot("/robot_2");
        leaving.latest_goal = Some("D1".into());
        let mut heading = robot("/robot_3");
        heading.final_goal = Some("D2".into());
        let robots = [leaving, heading];
        reg.refresh(&robots);

        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(reg.choose_destination_for("D0", "/robot_1", &mut rng).as_deref(), Some("D1"));

        // /robot_2 has not reported since leaving D1.
        reg.refresh(&robots);
        let d = reg.get("D1").unwrap();
        assert!(d.reserved);
        assert!(d.available);
        assert_eq!(reg.choose_destination_for("D0", "/robot_4", &mut rng), None);

        let mut arrived = robot("/robot_1");
        arrived.latest_goal = Some("D1".into());
        reg.refresh(&[arrived]);
        assert!(!reg.get("D1").unwrap().reserved);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_destinations_are_skipped() {
        let reg = registry(&["D1", "D2", "D3"]);
        let mut r = robot("/robot_1");
        r.final_goal = Some("D3".into());
        reg.refresh(&[r]);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(reg.choose_destination("D1", &mut rng).as_deref(), Some("D2"));
        assert!(reg.choose_destination("D1", &mut rng).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn equal_idleness_is_drawn_uniformly() {
        let names = ["D0", "D1", "D2", "D3"];
        let reg = registry(&names);
        let mut rng = StdRng::seed_from_u64(2024);
        let mut counts: HashMap<String, usize> = HashMap::new();

        const DRAWS: usize = 3_000;
        for _ in 0..DRAWS {
            let d = reg.choose_destination("D0", &mut rng).unwrap();
            reg.release(&d).unwrap();
            *counts.entry(d).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        for (name, n) in &counts {
            assert!((800..1200).contains(n), "{name} drawn {n} times out of {DRAWS}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_seed_same_choices() {
        let draw = || {
            let reg = registry(&["D0", "D1", "D2", "D3", "D4"]);
            let mut rng = StdRng::seed_from_u64(99);
            (0..30)
                .map(|_| {
                    let d = reg.choose_destination("D0", &mut rng).unwrap();
                    reg.release(&d).unwrap();
                    d
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(), draw());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_wakes_when_a_destination_frees_up() {
        let reg = Arc::new(registry(&["D1", "D2"]));
        reg.reserve("D2").unwrap();
        assert!(!reg.has_destination("D1"));

        let waiter = {
            let reg = reg.clone();
            tokio::spawn(async move { reg.wait_for_destination("D1", Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        reg.release("D2").unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn estimates_and_snapshot() {
        let reg = registry(&["D1", "D2"]);
        reg.set_estimates("D2", 12.5, 6.25).unwrap();
        let d = reg.get("D2").unwrap();
        assert_eq!(d.estimated_idleness, 12.5);
        assert_eq!(d.estimated_path_length, 6.25);

        tokio::time::advance(Duration::from_secs(2)).await;
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().all(|d| d.available && d.idleness == 2.0));
    }
}
