//! Robot-side half of the patrol system.
//!
//! A [`Navigator`] consumes topological paths from the planner, drives the
//! robot through them one waypoint at a time, and keeps the planner informed
//! with periodic [`RobotState`](api::v1::RobotState) reports that carry the
//! robot's afference.

pub mod afference;
pub mod error;
pub mod machine;
pub mod metrics;

pub use afference::{Afference, AfferenceEstimator, AfferenceMode};
pub use error::{NavigatorError, NavigatorResult};
pub use machine::{Navigator, NavigatorConfig};
pub use metrics::NavigatorMetrics;
