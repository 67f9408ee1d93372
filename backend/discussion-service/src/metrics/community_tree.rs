use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge};

lazy_static! {
    /// Rebuild outcomes (published/stale/error).
    pub static ref COMMUNITY_TREE_REFRESH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "community_tree_refresh_total",
        "Community tree rebuilds segmented by outcome",
        &["result"]
    )
    .expect("failed to register community_tree_refresh_total");

    /// Communities in the published snapshot.
    pub static ref COMMUNITY_TREE_NODES: IntGauge = register_int_gauge!(
        "community_tree_nodes",
        "Number of communities in the published tree snapshot"
    )
    .expect("failed to register community_tree_nodes");

    /// Freshness marker of the published snapshot, as a unix timestamp.
    pub static ref COMMUNITY_TREE_FRESHNESS_SECONDS: IntGauge = register_int_gauge!(
        "community_tree_freshness_seconds",
        "Newest community creation time covered by the published tree snapshot"
    )
    .expect("failed to register community_tree_freshness_seconds");
}
