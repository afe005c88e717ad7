//! Version 1 of the patrol wire messages.
//!
//! Messages are plain prost records so every payload crossing the bus is
//! encoded exactly as it would be on a real transport. Goal names that may be
//! absent are `optional` fields rather than a `"None"` sentinel string.

/// A position in the map frame, metres.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Point {
    #[prost(double, tag = "1")]
    pub x: f64,
    #[prost(double, tag = "2")]
    pub y: f64,
    #[prost(double, tag = "3")]
    pub z: f64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Quaternion {
    #[prost(double, tag = "1")]
    pub x: f64,
    #[prost(double, tag = "2")]
    pub y: f64,
    #[prost(double, tag = "3")]
    pub z: f64,
    #[prost(double, tag = "4")]
    pub w: f64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Pose {
    #[prost(message, optional, tag = "1")]
    pub position: Option<Point>,
    #[prost(message, optional, tag = "2")]
    pub orientation: Option<Quaternion>,
}

/// Localization estimate published on the pose feed.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PoseWithCovariance {
    #[prost(message, optional, tag = "1")]
    pub pose: Option<Pose>,
    /// Row-major 6x6 covariance.
    #[prost(double, repeated, tag = "2")]
    pub covariance: Vec<f64>,
    #[prost(int64, tag = "3")]
    pub stamp_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RobotStatus {
    Ready = 0,
    Busy = 1,
}

/// Periodic robot → planner report.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RobotState {
    #[prost(string, tag = "1")]
    pub robot_name: String,
    #[prost(enumeration = "RobotStatus", tag = "2")]
    pub state: i32,
    #[prost(string, optional, tag = "3")]
    pub afference: Option<String>,
    #[prost(double, tag = "4")]
    pub distance: f64,
    #[prost(string, optional, tag = "5")]
    pub current_goal: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub latest_goal: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub final_goal: Option<String>,
}

/// A named waypoint together with its pose. Used both for path assignments
/// and as the interest-point record.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToponavIpoint {
    #[prost(message, optional, tag = "1")]
    pub pose: Option<Pose>,
    #[prost(string, tag = "2")]
    pub name: String,
}

/// Planner → robot path assignment. The source waypoint is never included.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RobotTopopath {
    #[prost(message, repeated, tag = "1")]
    pub path: Vec<ToponavIpoint>,
}

/// Planner → debug consumers, one per destination per telemetry tick.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DestinationDebug {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub available: bool,
    #[prost(double, tag = "3")]
    pub idleness: f64,
}

/// Robot position next to the interest points picked by both afference
/// strategies.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AfferenceDebug {
    #[prost(string, tag = "1")]
    pub robot_name: String,
    #[prost(message, optional, tag = "2")]
    pub robot_position: Option<Point>,
    #[prost(message, optional, tag = "3")]
    pub euclidean_afference: Option<Point>,
    #[prost(message, optional, tag = "4")]
    pub path_afference: Option<Point>,
}
