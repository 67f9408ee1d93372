use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

lazy_static! {
    /// Committed vote applications by transition kind.
    pub static ref VOTE_APPLIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "vote_applied_total",
        "Vote applications segmented by transition",
        &["transition"]
    )
    .expect("failed to register vote_applied_total");

    /// Attempts retried after a row lock conflict.
    pub static ref VOTE_RETRY_TOTAL: IntCounter = register_int_counter!(
        "vote_retry_total",
        "Vote attempts retried after a concurrency conflict"
    )
    .expect("failed to register vote_retry_total");

    /// Votes that exhausted their retry budget.
    pub static ref VOTE_CONFLICT_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        "vote_conflict_exhausted_total",
        "Votes surfaced as transient storage errors after exhausting retries"
    )
    .expect("failed to register vote_conflict_exhausted_total");
}
