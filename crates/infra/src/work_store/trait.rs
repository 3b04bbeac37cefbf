use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use adprompt_core::WorkItemId;
use adprompt_products::WorkItem;

/// Record store operation error.
///
/// These are **infrastructure errors**. A failed claim is folded into "no work
/// available" by [`WorkItemStore::claim_batch`]; a failed write is reported per
/// record and never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkStoreError {
    #[error("work item not found: {0}")]
    NotFound(WorkItemId),

    /// The row already carries a result; it is never overwritten.
    #[error("work item {0} already has a result")]
    AlreadyCompleted(WorkItemId),

    #[error("connection pool closed during {0}")]
    PoolClosed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// What happens to a claimed item whose generation attempts were exhausted.
///
/// Without a policy such an item stays claimed with no result forever and no
/// later run will offer it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Keep the claim; the item waits for manual follow-up.
    #[default]
    LeaveClaimed,
    /// Clear the claim so a future run can pick the item up again.
    Release,
    /// Flag the claim as failed: not claimable, but distinguishable from
    /// items still in flight.
    MarkFailed,
}

impl ExhaustionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExhaustionPolicy::LeaveClaimed => "leave-claimed",
            ExhaustionPolicy::Release => "release",
            ExhaustionPolicy::MarkFailed => "mark-failed",
        }
    }
}

impl core::fmt::Display for ExhaustionPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leave-claimed" | "leave_claimed" => Ok(Self::LeaveClaimed),
            "release" => Ok(Self::Release),
            "mark-failed" | "mark_failed" => Ok(Self::MarkFailed),
            other => Err(format!(
                "unknown exhaustion policy '{other}' (expected leave-claimed, release or mark-failed)"
            )),
        }
    }
}

/// Store of claimable work items.
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Atomically claim up to `limit` eligible items ordered by id ascending.
    ///
    /// Eligible means: no result yet, upstream flag set, claim flag unset. The
    /// claim flag of every returned item is set in the same transaction, so no
    /// concurrent caller can receive the same item.
    async fn try_claim_batch(&self, limit: usize) -> Result<Vec<WorkItem>, WorkStoreError>;

    /// Like [`try_claim_batch`](Self::try_claim_batch), but a failure is logged
    /// and reported as an empty batch. Empty therefore means "nothing available
    /// or adapter failure"; re-running the job is always safe.
    async fn claim_batch(&self, limit: usize) -> Vec<WorkItem> {
        match self.try_claim_batch(limit).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, limit, "claim failed; treating as no work available");
                Vec::new()
            }
        }
    }

    /// Write the result payload and bump the modification timestamp.
    ///
    /// Only a row without a result is written.
    async fn persist_result(&self, id: WorkItemId, payload: &str) -> Result<(), WorkStoreError>;

    /// Apply the exhaustion policy to a claimed item that got no result.
    async fn settle_exhausted(
        &self,
        id: WorkItemId,
        policy: ExhaustionPolicy,
    ) -> Result<(), WorkStoreError>;
}

#[async_trait]
impl<S: WorkItemStore + ?Sized> WorkItemStore for Arc<S> {
    async fn try_claim_batch(&self, limit: usize) -> Result<Vec<WorkItem>, WorkStoreError> {
        (**self).try_claim_batch(limit).await
    }

    async fn claim_batch(&self, limit: usize) -> Vec<WorkItem> {
        (**self).claim_batch(limit).await
    }

    async fn persist_result(&self, id: WorkItemId, payload: &str) -> Result<(), WorkStoreError> {
        (**self).persist_result(id, payload).await
    }

    async fn settle_exhausted(
        &self,
        id: WorkItemId,
        policy: ExhaustionPolicy,
    ) -> Result<(), WorkStoreError> {
        (**self).settle_exhausted(id, policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_policy_parses_cli_spellings() {
        assert_eq!("leave-claimed".parse(), Ok(ExhaustionPolicy::LeaveClaimed));
        assert_eq!("Release".parse(), Ok(ExhaustionPolicy::Release));
        assert_eq!("mark_failed".parse(), Ok(ExhaustionPolicy::MarkFailed));
        assert!("retry-forever".parse::<ExhaustionPolicy>().is_err());
        assert_eq!(ExhaustionPolicy::default(), ExhaustionPolicy::LeaveClaimed);
    }

    #[test]
    fn exhaustion_policy_display_round_trips() {
        for policy in [
            ExhaustionPolicy::LeaveClaimed,
            ExhaustionPolicy::Release,
            ExhaustionPolicy::MarkFailed,
        ] {
            assert_eq!(policy.to_string().parse::<ExhaustionPolicy>(), Ok(policy));
        }
    }
}
