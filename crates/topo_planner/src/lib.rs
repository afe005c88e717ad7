//! Centralised planner for multi-robot topological patrolling.
//!
//! | Module             | Responsibility                                          |
//! |--------------------|---------------------------------------------------------|
//! | [`graph`]          | waypoint graph, adjacency-list loading, shortest paths  |
//! | [`destinations`]   | availability, reservation, idleness, availability sweep |
//! | [`robots`]         | fleet view, READY queue, report listeners               |
//! | [`dispatcher`]     | one dispatch cycle per READY robot                      |
//! | [`telemetry`]      | periodic destination debug records and gauges           |
//! | [`idleness_log`]   | idleness statistics written at shutdown                 |
//! | [`config`]         | TOML scenario file                                      |
//! | [`fleet`]          | simulated robots and their navigators                   |
//! | [`simulation`]     | one run: planner tasks plus fleet, ordered shutdown     |
//! | [`metrics`]        | Prometheus collectors and `/metrics` router             |

pub mod config;
pub mod destinations;
pub mod dispatcher;
pub mod error;
pub mod fleet;
pub mod graph;
pub mod idleness_log;
pub mod metrics;
pub mod robots;
pub mod simulation;
pub mod state;
pub mod telemetry;

pub use config::Scenario;
pub use destinations::{run_availability_sweep, Destination, DestinationRegistry};
pub use dispatcher::{Assignment, DispatchConfig, TaskDispatcher};
pub use error::{PlannerError, PlannerResult};
pub use graph::{Path, TopologyGraph};
pub use idleness_log::IdlenessLogger;
pub use metrics::Metrics;
pub use robots::{run_report_listener, Robot, RobotRegistry};
pub use simulation::Simulation;
pub use state::PlannerState;

#[cfg(test)]
pub(crate) mod fixtures {
    use api::v1::{Pose, ToponavIpoint};

    use crate::robots::Robot;

    /// Seven-waypoint office loop: a corridor 1-2-3-4-7 with a detour
    /// 2-5-6-7.
    pub const OFFICE: &str = "\
# office map
WayPoint1, WayPoint2
WayPoint2, WayPoint3, WayPoint5
WayPoint3, WayPoint4
WayPoint4, WayPoint7
WayPoint5, WayPoint6
WayPoint6, WayPoint7
";

    pub const OFFICE_POSES: [(&str, f64, f64); 7] = [
        ("WayPoint1", 0.0, 0.0),
        ("WayPoint2", 1.0, 1.0),
        ("WayPoint3", 1.0, 2.0),
        ("WayPoint4", 2.0, 2.0),
        ("WayPoint5", 3.0, 0.0),
        ("WayPoint6", 4.0, 1.0),
        ("WayPoint7", 3.0, 3.0),
    ];

    /// Interest points on a line, `i` metres from the origin.
    pub fn interest_points(names: &[&str]) -> Vec<ToponavIpoint> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| ToponavIpoint {
                pose: Some(Pose::at(i as f64, 0.0, 0.0)),
                name: (*name).to_owned(),
            })
            .collect()
    }

    pub fn office_interest_points() -> Vec<ToponavIpoint> {
        OFFICE_POSES
            .iter()
            .map(|&(name, x, y)| ToponavIpoint {
                pose: Some(Pose::at(x, y, 0.0)),
                name: name.to_owned(),
            })
            .collect()
    }

    pub fn robot(namespace: &str) -> Robot {
        Robot::new(namespace, "red")
    }
}
