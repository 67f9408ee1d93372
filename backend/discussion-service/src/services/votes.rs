/// Vote ledger
///
/// Applies a voter's vote on a post and keeps the post's `{count, total}`
/// aggregate in step. The read of the existing vote takes its row lock, and
/// the aggregate moves by relative deltas, so concurrent voters on one post
/// never overwrite each other. Lock conflicts are retried a bounded number of
/// times with jittered backoff.
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::VoteConfig;
use crate::db::VoteStore;
use crate::error::{AppError, Result};
use crate::metrics::votes::{VOTE_APPLIED_TOTAL, VOTE_CONFLICT_EXHAUSTED_TOTAL, VOTE_RETRY_TOTAL};
use crate::models::UserId;
use crate::services::RequestContext;

/// What a vote request does to the stored vote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTransition {
    /// Requested value equals the stored one (0 meaning no row)
    Unchanged,
    /// Stored vote removed
    Retract { previous: i16 },
    /// New vote row
    Cast { value: i16 },
    /// Stored vote flipped to the opposite sign
    Change { from: i16, to: i16 },
}

impl VoteTransition {
    /// `existing` is 0 when the voter has no vote on the target.
    pub fn plan(existing: i16, requested: i16) -> Self {
        match (existing, requested) {
            (e, v) if e == v => VoteTransition::Unchanged,
            (e, 0) => VoteTransition::Retract { previous: e },
            (0, v) => VoteTransition::Cast { value: v },
            (e, v) => VoteTransition::Change { from: e, to: v },
        }
    }

    /// `(Δtotal, Δcount)` applied to the target's aggregate.
    pub fn deltas(&self) -> (i64, i64) {
        match *self {
            VoteTransition::Unchanged => (0, 0),
            VoteTransition::Retract { previous } => (-i64::from(previous), -1),
            VoteTransition::Cast { value } => (i64::from(value), 1),
            VoteTransition::Change { from, to } => (i64::from(to) - i64::from(from), 0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteTransition::Unchanged => "unchanged",
            VoteTransition::Retract { .. } => "retract",
            VoteTransition::Cast { .. } => "cast",
            VoteTransition::Change { .. } => "change",
        }
    }
}

/// Result of a committed vote application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub transition: VoteTransition,
    pub delta_total: i64,
    pub delta_count: i64,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

pub struct VoteLedger {
    store: Arc<dyn VoteStore>,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn VoteStore>, config: &VoteConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff(),
        }
    }

    /// Apply `value` (-1, 0 or 1) as `voter`'s vote on `target_id`.
    pub async fn apply_vote(
        &self,
        voter: &UserId,
        target_id: i64,
        value: i64,
        ctx: &RequestContext,
    ) -> Result<VoteOutcome> {
        let value = match value {
            -1..=1 => value as i16,
            other => return Err(AppError::InvalidVoteValue(other)),
        };

        let outcome = ctx
            .run(self.apply_with_retry(voter, target_id, value))
            .await?;

        VOTE_APPLIED_TOTAL
            .with_label_values(&[outcome.transition.as_str()])
            .inc();
        info!(
            voter = %voter,
            target_id = target_id,
            transition = outcome.transition.as_str(),
            delta_total = outcome.delta_total,
            delta_count = outcome.delta_count,
            attempts = outcome.attempts,
            "Vote applied"
        );

        Ok(outcome)
    }

    async fn apply_with_retry(
        &self,
        voter: &UserId,
        target_id: i64,
        value: i16,
    ) -> Result<VoteOutcome> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.apply_once(voter, target_id, value).await {
                Ok(transition) => {
                    let (delta_total, delta_count) = transition.deltas();
                    return Ok(VoteOutcome {
                        transition,
                        delta_total,
                        delta_count,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    VOTE_RETRY_TOTAL.inc();
                    warn!(
                        target_id = target_id,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Vote conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    VOTE_CONFLICT_EXHAUSTED_TOTAL.inc();
                    warn!(
                        target_id = target_id,
                        attempts = attempt,
                        error = %e,
                        "Vote conflict persisted after retries"
                    );
                    return Err(AppError::TransientStorage(e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One transaction: lock, plan, write, adjust, commit. Any early return
    /// drops the unit of work, which rolls it back.
    async fn apply_once(&self, voter: &UserId, target_id: i64, value: i16) -> Result<VoteTransition> {
        let mut uow = self.store.begin().await?;

        let existing = uow.lock_existing(voter, target_id).await?.unwrap_or(0);
        let transition = VoteTransition::plan(existing, value);

        match transition {
            VoteTransition::Unchanged => {
                debug!(target_id = target_id, "Vote unchanged");
                return Ok(transition);
            }
            VoteTransition::Retract { .. } => uow.delete_vote(voter, target_id).await?,
            VoteTransition::Cast { value } => uow.insert_vote(voter, target_id, value).await?,
            VoteTransition::Change { to, .. } => uow.update_vote(voter, target_id, to).await?,
        }

        let (delta_total, delta_count) = transition.deltas();
        uow.adjust_aggregate(target_id, delta_total, delta_count)
            .await?;
        uow.commit().await?;

        Ok(transition)
    }

    /// Linear backoff with up to 50% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff.as_millis() as u64 * u64::from(attempt);
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}
