//! Community hierarchy cache
//!
//! Readers see one immutable [`HierarchySnapshot`] at a time. Rebuilds read
//! every community and publish the result only when it covers a newer
//! community than the published one, so a slow rebuild finishing late never
//! replaces fresher data.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::db::CommunityStore;
use crate::error::{AppError, Result};
use crate::metrics::community_tree::{
    COMMUNITY_TREE_FRESHNESS_SECONDS, COMMUNITY_TREE_NODES, COMMUNITY_TREE_REFRESH_TOTAL,
};
use crate::models::{Community, CommunityPosition};

/// Immutable view of the community forest.
#[derive(Debug, Clone)]
pub struct HierarchySnapshot {
    /// Children by parent id; `None` holds the roots
    children: HashMap<Option<i64>, Vec<Community>>,
    /// Parent of every known community; `None` for roots
    parents: HashMap<i64, Option<Community>>,
    /// Newest `created_at` among the communities, epoch when empty
    freshness: DateTime<Utc>,
    built_at: DateTime<Utc>,
}

impl HierarchySnapshot {
    pub fn build(communities: Vec<Community>) -> Self {
        let by_id: HashMap<i64, &Community> = communities.iter().map(|c| (c.id, c)).collect();

        let mut children: HashMap<Option<i64>, Vec<Community>> = HashMap::new();
        let mut parents = HashMap::with_capacity(communities.len());
        for community in &communities {
            children
                .entry(community.parent_id)
                .or_default()
                .push(community.clone());
            let parent = community
                .parent_id
                .and_then(|pid| by_id.get(&pid))
                .map(|p| (*p).clone());
            parents.insert(community.id, parent);
        }

        let freshness = communities
            .iter()
            .map(|c| c.created_at)
            .max()
            // Unix epoch
            .unwrap_or_default();

        Self {
            children,
            parents,
            freshness,
            built_at: Utc::now(),
        }
    }

    pub fn freshness(&self) -> DateTime<Utc> {
        self.freshness
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Direct children and the root-first ancestor chain of `id`. Unknown ids
    /// yield empty lists.
    pub fn position(&self, id: i64) -> CommunityPosition {
        let children = self.children.get(&Some(id)).cloned().unwrap_or_default();

        let mut path = Vec::new();
        let mut current = self.parents.get(&id).and_then(Option::as_ref);
        while let Some(parent) = current {
            // A cycle in the stored data would otherwise never terminate
            if path.len() >= self.parents.len() {
                break;
            }
            path.push(parent.clone());
            current = self.parents.get(&parent.id).and_then(Option::as_ref);
        }
        path.reverse();

        CommunityPosition { children, path }
    }
}

/// Result of a rebuild that completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Published,
    /// Built fine, but not newer than what is already published
    Stale,
}

pub struct CommunityTreeCache {
    store: Arc<dyn CommunityStore>,
    published: RwLock<Option<Arc<HierarchySnapshot>>>,
    build_timeout: Duration,
}

impl CommunityTreeCache {
    /// Cache with nothing published yet.
    pub fn new(store: Arc<dyn CommunityStore>, build_timeout: Duration) -> Self {
        Self {
            store,
            published: RwLock::new(None),
            build_timeout,
        }
    }

    /// Build and publish the first snapshot. Callers treat failure as fatal.
    pub async fn initialize(
        store: Arc<dyn CommunityStore>,
        build_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let cache = Arc::new(Self::new(store, build_timeout));
        cache.refresh().await?;
        Ok(cache)
    }

    /// Rebuild from storage and publish if newer.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let start = Instant::now();

        let snapshot = match self.build_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                COMMUNITY_TREE_REFRESH_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                return Err(e);
            }
        };
        let nodes = snapshot.len();
        let freshness = snapshot.freshness();
        let built_at = snapshot.built_at();

        let outcome = if self.publish(snapshot) {
            RefreshOutcome::Published
        } else {
            RefreshOutcome::Stale
        };

        match outcome {
            RefreshOutcome::Published => {
                COMMUNITY_TREE_REFRESH_TOTAL
                    .with_label_values(&["published"])
                    .inc();
                info!(
                    nodes = nodes,
                    freshness = %freshness,
                    built_at = %built_at,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Community tree published"
                );
            }
            RefreshOutcome::Stale => {
                COMMUNITY_TREE_REFRESH_TOTAL
                    .with_label_values(&["stale"])
                    .inc();
                debug!(
                    nodes = nodes,
                    freshness = %freshness,
                    "Community tree rebuild was not newer; keeping published snapshot"
                );
            }
        }

        Ok(outcome)
    }

    async fn build_snapshot(&self) -> Result<HierarchySnapshot> {
        let communities = tokio::time::timeout(self.build_timeout, self.store.list_communities())
            .await
            .map_err(|_| {
                AppError::CacheRefresh(format!(
                    "rebuild exceeded {}ms",
                    self.build_timeout.as_millis()
                ))
            })?
            .map_err(|e| AppError::CacheRefresh(e.to_string()))?;

        Ok(HierarchySnapshot::build(communities))
    }

    /// Publish `snapshot` when nothing is published or it is strictly newer.
    /// Returns whether it was published.
    pub fn publish(&self, snapshot: HierarchySnapshot) -> bool {
        let mut published = self.published.write();
        let newer = published
            .as_ref()
            .map_or(true, |current| snapshot.freshness > current.freshness);
        if !newer {
            return false;
        }

        COMMUNITY_TREE_NODES.set(snapshot.len() as i64);
        COMMUNITY_TREE_FRESHNESS_SECONDS.set(snapshot.freshness.timestamp());
        *published = Some(Arc::new(snapshot));
        true
    }

    /// The published snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<HierarchySnapshot>> {
        self.published.read().clone()
    }

    pub fn position(&self, id: i64) -> CommunityPosition {
        self.snapshot()
            .map(|snapshot| snapshot.position(id))
            .unwrap_or_default()
    }

    /// Rebuild in the background. Failures are logged, never returned.
    pub fn trigger_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = cache.refresh().await {
                error!(error = %e, "Community tree rebuild failed");
            }
        })
    }
}
