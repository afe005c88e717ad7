use std::sync::atomic::{AtomicBool, Ordering};

use api::v1::{Point, Pose, Quaternion};
use api::{PathPlanner, PlanError};
use async_trait::async_trait;
use nalgebra::Vector2;

/// Obstacle-free planner: a straight line from start to goal, sampled every
/// `resolution` metres with both ends included.
pub struct SimPlanner {
    resolution: f64,
    online: AtomicBool,
}

impl SimPlanner {
    pub fn new(resolution: f64) -> Self {
        Self {
            resolution,
            online: AtomicBool::new(true),
        }
    }

    /// While offline every request fails with [`PlanError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PathPlanner for SimPlanner {
    async fn make_plan(&self, start: &Pose, goal: &Pose, _tolerance: f64) -> Result<Vec<Pose>, PlanError> {
        if !self.is_online() {
            return Err(PlanError::Unavailable);
        }

        let s = start.point();
        let g = goal.point();
        let from = Vector2::new(s.x, s.y);
        let delta = Vector2::new(g.x, g.y) - from;
        let steps = (delta.norm() / self.resolution).ceil().max(1.0) as usize;
        let heading = Quaternion::from_yaw(delta.y.atan2(delta.x));

        Ok((0..=steps)
            .map(|i| {
                let p = from + delta * (i as f64 / steps as f64);
                Pose {
                    position: Some(Point::new(p.x, p.y, s.z)),
                    orientation: Some(heading),
                }
            })
            .collect())
    }
}
