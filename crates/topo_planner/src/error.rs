//! Planner error type.

use thiserror::Error;

/// Errors produced by the planner library.
///
/// `Configuration` is fatal at startup. `NoPath` and `CapabilityUnavailable`
/// abandon or degrade a single dispatch cycle.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no path from {from} to {to}")]
    NoPath { from: String, to: String },

    #[error("robot {0} has not reported an afference")]
    NoAfference(String),

    #[error("waypoint {0} is not in the topological map")]
    UnknownWaypoint(String),

    #[error("destination {0} is not an interest point")]
    UnknownDestination(String),

    #[error("destination {0} is already reserved")]
    AlreadyReserved(String),

    #[error("planning capability unavailable: {0}")]
    CapabilityUnavailable(#[from] api::PlanError),

    #[error("navigator error: {0}")]
    Navigator(#[from] topo_navigator::NavigatorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scenario parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("statistics encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PlannerResult<T> = Result<T, PlannerError>;
