//! Community Tree Refresher Background Job
//!
//! Rebuilds the community hierarchy snapshot on a fixed interval so that
//! communities created through other instances, or whose post-creation
//! rebuild failed, eventually appear. A failed cycle is logged and the
//! published snapshot keeps serving until a later cycle succeeds.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::config::CommunityTreeConfig;
use crate::services::community_tree::{CommunityTreeCache, RefreshOutcome};

/// Configuration for the refresher
#[derive(Clone)]
pub struct CommunityTreeRefresherConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl From<&CommunityTreeConfig> for CommunityTreeRefresherConfig {
    fn from(config: &CommunityTreeConfig) -> Self {
        Self {
            enabled: config.refresh_interval_secs > 0,
            interval: config.refresh_interval(),
        }
    }
}

/// Run the refresher until the task is dropped. The initial build happens at
/// startup, so the first cycle waits one interval.
pub async fn start_community_tree_refresher(
    cache: Arc<CommunityTreeCache>,
    config: CommunityTreeRefresherConfig,
) {
    if !config.enabled {
        tracing::info!("Community tree refresher disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        "Starting community tree refresher"
    );

    loop {
        sleep(config.interval).await;

        let cycle_start = Instant::now();
        match cache.refresh().await {
            Ok(outcome) => {
                tracing::debug!(
                    published = outcome == RefreshOutcome::Published,
                    duration_ms = cycle_start.elapsed().as_millis() as u64,
                    "Community tree refresh cycle completed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    duration_ms = cycle_start.elapsed().as_millis() as u64,
                    "Community tree refresh cycle failed"
                );
            }
        }
    }
}
