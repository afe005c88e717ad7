//! Stand-ins for the parts of a robot the patrol system talks to: the
//! localisation feed, the goal-driven motion controller, and the `make_plan`
//! capability.

pub mod planner;
pub mod robot;

pub use planner::SimPlanner;
pub use robot::{SimRobot, SimRobotConfig};
