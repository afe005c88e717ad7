//! The `make_plan` capability: point-to-point metric paths provided by the
//! robot's navigation stack.
//!
//! The capability may be briefly unreachable. Callers go through
//! [`plan_with_retry`], which retries [`PlanError::Unavailable`] with a fixed
//! backoff and gives up after the policy's timeout instead of waiting
//! forever.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::v1::Pose;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("planning capability unavailable")]
    Unavailable,

    #[error("no plan between the requested poses")]
    NoPlan,

    #[error("planning capability did not answer within {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait PathPlanner: Send + Sync {
    /// Plans from `start` to within `tolerance` metres of `goal`. The result
    /// starts at `start`.
    async fn make_plan(&self, start: &Pose, goal: &Pose, tolerance: f64) -> Result<Vec<Pose>, PlanError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(200),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Calls `make_plan`, retrying while the capability is unavailable.
///
/// Any other error is returned at once. If the capability has not produced
/// an answer after `policy.timeout`, fails with [`PlanError::TimedOut`].
pub async fn plan_with_retry(
    planner: &dyn PathPlanner,
    start: &Pose,
    goal: &Pose,
    tolerance: f64,
    policy: &RetryPolicy,
) -> Result<Vec<Pose>, PlanError> {
    let attempt = async {
        loop {
            match planner.make_plan(start, goal, tolerance).await {
                Err(PlanError::Unavailable) => {
                    tracing::debug!(backoff = ?policy.backoff, "make_plan unavailable, retrying");
                    tokio::time::sleep(policy.backoff).await;
                }
                other => return other,
            }
        }
    };

    tokio::time::timeout(policy.timeout, attempt)
        .await
        .unwrap_or(Err(PlanError::TimedOut(policy.timeout)))
}
