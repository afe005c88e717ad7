use crate::v1::{Point, Pose, Quaternion};

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Distance in the ground plane. Height is ignored, as it is for goal
    /// checks and afference.
    #[inline]
    pub fn planar_distance(&self, other: &Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    /// Rotation about the vertical axis only.
    pub fn from_yaw(yaw: f64) -> Self {
        let half = yaw * 0.5;
        Quaternion { x: 0.0, y: 0.0, z: half.sin(), w: half.cos() }
    }
}

impl Pose {
    /// Pose at `(x, y, z)` with identity orientation.
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Pose {
            position: Some(Point::new(x, y, z)),
            orientation: Some(Quaternion::IDENTITY),
        }
    }

    /// Position of the pose; a missing position reads as the origin.
    #[inline]
    pub fn point(&self) -> Point {
        self.position.unwrap_or_default()
    }

    #[inline]
    pub fn planar_distance(&self, other: &Pose) -> f64 {
        self.point().planar_distance(&other.point())
    }
}

/// Sum of the planar lengths of consecutive segments of a plan.
///
/// Plans with fewer than two poses have length zero.
pub fn path_length(poses: &[Pose]) -> f64 {
    poses
        .windows(2)
        .map(|w| w[0].planar_distance(&w[1]))
        .sum()
}
