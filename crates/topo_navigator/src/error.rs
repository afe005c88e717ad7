use thiserror::Error;

#[derive(Debug, Error)]
pub enum NavigatorError {
    #[error("no interest points configured")]
    NoInterestPoints,

    #[error("invalid navigator configuration: {0}")]
    InvalidConfig(String),

    #[error("no interest point is reachable from {x:.2}, {y:.2}")]
    Unreachable { x: f64, y: f64 },

    #[error("planning capability unavailable: {0}")]
    CapabilityUnavailable(#[from] api::PlanError),
}

pub type NavigatorResult<T> = Result<T, NavigatorError>;
