//! Afference: the interest point a robot is considered to be at.

use std::sync::Arc;

use api::v1::{AfferenceDebug, Pose, ToponavIpoint};
use api::{path_length, plan_with_retry, PathPlanner, PlanError, RetryPolicy};
use serde::Deserialize;

use crate::{NavigatorError, NavigatorResult};

/// How distances to interest points are measured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum AfferenceMode {
    /// Straight-line distance in the ground plane.
    #[default]
    #[serde(alias = "euclidean")]
    Euclidean,
    /// Length of the plan returned by the planning capability.
    #[serde(alias = "path_based", alias = "DWAPlanner")]
    PathBased,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Afference {
    pub name: String,
    pub distance: f64,
    pub pose: Pose,
}

pub struct AfferenceEstimator {
    mode: AfferenceMode,
    interest_points: Vec<ToponavIpoint>,
    planner: Arc<dyn PathPlanner>,
    tolerance: f64,
    retry: RetryPolicy,
}

impl AfferenceEstimator {
    pub fn new(
        mode: AfferenceMode,
        interest_points: Vec<ToponavIpoint>,
        planner: Arc<dyn PathPlanner>,
        tolerance: f64,
        retry: RetryPolicy,
    ) -> NavigatorResult<Self> {
        if interest_points.is_empty() {
            return Err(NavigatorError::NoInterestPoints);
        }
        Ok(Self {
            mode,
            interest_points,
            planner,
            tolerance,
            retry,
        })
    }

    pub fn mode(&self) -> AfferenceMode {
        self.mode
    }

    /// Afference under the configured mode.
    pub async fn estimate(&self, pose: &Pose) -> NavigatorResult<Afference> {
        match self.mode {
            AfferenceMode::Euclidean => Ok(self.euclidean(pose)),
            AfferenceMode::PathBased => self.path_based(pose).await,
        }
    }

    /// Nearest interest point in a straight line. The first of several
    /// equally near points wins.
    pub fn euclidean(&self, pose: &Pose) -> Afference {
        let mut best = &self.interest_points[0];
        let mut best_distance = f64::INFINITY;
        for ip in &self.interest_points {
            let distance = pose.planar_distance(&ip.pose.unwrap_or_default());
            if distance < best_distance {
                best = ip;
                best_distance = distance;
            }
        }
        afference(best, best_distance)
    }

    /// Interest point with the shortest plan. The last of several equally
    /// short plans wins.
    ///
    /// Points the capability cannot plan to are skipped. Fails if the
    /// capability stays unavailable past the retry policy's timeout.
    pub async fn path_based(&self, pose: &Pose) -> NavigatorResult<Afference> {
        let mut best: Option<(&ToponavIpoint, f64)> = None;

        for ip in &self.interest_points {
            let goal = ip.pose.unwrap_or_default();
            let plan = match plan_with_retry(self.planner.as_ref(), pose, &goal, self.tolerance, &self.retry).await {
                Ok(plan) => plan,
                Err(PlanError::NoPlan) => {
                    tracing::debug!(interest_point = %ip.name, "No plan to interest point, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let length = path_length(&plan);
            if best.map_or(true, |(_, d)| length <= d) {
                best = Some((ip, length));
            }
        }

        let (ip, distance) = best.ok_or_else(|| {
            let p = pose.point();
            NavigatorError::Unreachable { x: p.x, y: p.y }
        })?;
        Ok(afference(ip, distance))
    }

    /// Both strategies side by side, for the debug topic. Never applied to
    /// the robot's state.
    pub async fn debug_record(&self, robot_name: &str, pose: &Pose) -> AfferenceDebug {
        let path_afference = match self.path_based(pose).await {
            Ok(a) => Some(a.pose.point()),
            Err(e) => {
                tracing::debug!(robot = robot_name, error = %e, "Path afference unavailable for debug record");
                None
            }
        };
        AfferenceDebug {
            robot_name: robot_name.to_owned(),
            robot_position: Some(pose.point()),
            euclidean_afference: Some(self.euclidean(pose).pose.point()),
            path_afference,
        }
    }
}

fn afference(ip: &ToponavIpoint, distance: f64) -> Afference {
    Afference {
        name: ip.name.clone(),
        distance,
        pose: ip.pose.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    fn ip(name: &str, x: f64, y: f64) -> ToponavIpoint {
        ToponavIpoint {
            pose: Some(Pose::at(x, y, 0.0)),
            name: name.into(),
        }
    }

    /// Plans through a fixed detour length per goal x-coordinate.
    struct Detours {
        lengths: HashMap<i64, f64>,
        offline: bool,
    }

    #[async_trait]
    impl PathPlanner for Detours {
        async fn make_plan(&self, start: &Pose, goal: &Pose, _tolerance: f64) -> Result<Vec<Pose>, PlanError> {
            if self.offline {
                return Err(PlanError::Unavailable);
            }
            let key = goal.point().x as i64;
            match self.lengths.get(&key) {
                Some(&len) => {
                    let s = start.point();
                    Ok(vec![*start, Pose::at(s.x + len, s.y, 0.0)])
                }
                None => Err(PlanError::NoPlan),
            }
        }
    }

    fn estimator(mode: AfferenceMode, lengths: &[(i64, f64)], offline: bool) -> AfferenceEstimator {
        let planner = Arc::new(Detours {
            lengths: lengths.iter().copied().collect(),
            offline,
        });
        AfferenceEstimator::new(
            mode,
            vec![ip("A", 0.0, 0.0), ip("B", 2.0, 0.0), ip("C", 4.0, 0.0)],
            planner,
            0.5,
            RetryPolicy {
                backoff: Duration::from_millis(50),
                timeout: Duration::from_millis(500),
            },
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_interest_points() {
        let planner = Arc::new(Detours {
            lengths: HashMap::new(),
            offline: false,
        });
        let result = AfferenceEstimator::new(AfferenceMode::Euclidean, vec![], planner, 0.5, RetryPolicy::default());
        assert!(matches!(result, Err(NavigatorError::NoInterestPoints)));
    }

    #[test]
    fn euclidean_picks_nearest_and_first_on_ties() {
        let est = estimator(AfferenceMode::Euclidean, &[], false);
        let a = est.euclidean(&Pose::at(3.4, 0.0, 0.0));
        assert_eq!(a.name, "C");
        assert!((a.distance - 0.6).abs() < 1e-9);

        // Exactly between A and B.
        assert_eq!(est.euclidean(&Pose::at(1.0, 0.0, 0.0)).name, "A");
    }

    #[tokio::test(start_paused = true)]
    async fn path_mode_uses_plan_length_and_last_tie_wins() {
        // Straight-line nearest is A, but its plan is a long detour.
        let est = estimator(AfferenceMode::PathBased, &[(0, 9.0), (2, 3.0), (4, 3.0)], false);
        let a = est.estimate(&Pose::at(0.5, 0.0, 0.0)).await.unwrap();
        assert_eq!(a.name, "C");
        assert_eq!(a.distance, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn path_mode_skips_unplannable_points() {
        let est = estimator(AfferenceMode::PathBased, &[(2, 5.0)], false);
        let a = est.estimate(&Pose::at(0.0, 0.0, 0.0)).await.unwrap();
        assert_eq!(a.name, "B");

        let none = estimator(AfferenceMode::PathBased, &[], false);
        assert!(matches!(
            none.estimate(&Pose::at(0.0, 0.0, 0.0)).await,
            Err(NavigatorError::Unreachable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn path_mode_gives_up_when_capability_stays_down() {
        let est = estimator(AfferenceMode::PathBased, &[(0, 1.0)], true);
        let err = est.estimate(&Pose::at(0.0, 0.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, NavigatorError::CapabilityUnavailable(PlanError::TimedOut(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn debug_record_reports_both_modes() {
        let est = estimator(AfferenceMode::Euclidean, &[(0, 9.0), (4, 1.0)], false);
        let record = est.debug_record("/robot_1", &Pose::at(0.2, 0.0, 0.0)).await;
        assert_eq!(record.robot_name, "/robot_1");
        assert_eq!(record.euclidean_afference.unwrap().x, 0.0);
        assert_eq!(record.path_afference.unwrap().x, 4.0);
    }
}
