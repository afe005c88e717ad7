//! Shared contract between the patrol planner and the robot navigators.
//!
//! | Module       | Contents                                                  |
//! |--------------|-----------------------------------------------------------|
//! | [`v1`]       | prost wire messages (`RobotState`, `RobotTopopath`, ...)  |
//! | [`geometry`] | planar distances and plan lengths over `v1` poses         |
//! | [`topics`]   | topic suffixes and per-robot topic naming                 |
//! | [`bus`]      | in-process pub/sub transport with link impairment         |
//! | [`plan`]     | `PathPlanner` capability and bounded retry policy         |

pub mod bus;
pub mod geometry;
pub mod plan;
pub mod topics;
pub mod v1;

pub use bus::{Bus, LinkProfile, Subscription};
pub use geometry::path_length;
pub use plan::{plan_with_retry, PathPlanner, PlanError, RetryPolicy};
pub use topics::Topics;
