/// Business logic layer for discussion-service
///
/// This module provides:
/// - Feed service: keyset pagination over the four feed cursors
/// - Vote ledger: atomic vote transitions with bounded retry
/// - Community tree cache: hierarchy snapshots and background refresh
/// - Community service: community creation
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{AppError, Result};

pub mod communities;
pub mod community_tree;
pub mod feed;
pub mod votes;

pub use communities::CommunityService;
pub use community_tree::{CommunityTreeCache, HierarchySnapshot};
pub use feed::{FeedPage, FeedService};
pub use votes::{VoteLedger, VoteOutcome, VoteTransition};

/// Per-request deadline. Work still running when it elapses is dropped, which
/// rolls back any open transaction, and the caller sees `Cancelled`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
}

impl RequestContext {
    /// No deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| AppError::Cancelled)?,
            None => fut.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elapsed_deadline_cancels() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(5));
        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn background_context_never_cancels() {
        let result = RequestContext::background().run(async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
