use std::sync::Arc;
use tracing::info;

use crate::db::CommunityStore;
use crate::error::{AppError, Result};
use crate::models::Community;
use crate::services::CommunityTreeCache;

/// Community mutations. Every successful write schedules a tree rebuild.
pub struct CommunityService {
    store: Arc<dyn CommunityStore>,
    tree: Arc<CommunityTreeCache>,
}

impl CommunityService {
    pub fn new(store: Arc<dyn CommunityStore>, tree: Arc<CommunityTreeCache>) -> Self {
        Self { store, tree }
    }

    /// Create a community under `parent_id` (or as a root). The rebuild runs in
    /// the background, so the new community may not show up in positions
    /// immediately.
    pub async fn create_community(&self, name: &str, parent_id: Option<i64>) -> Result<Community> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidArgument(
                "community name must not be empty".to_string(),
            ));
        }

        let community = self.store.create_community(name, parent_id).await?;
        info!(
            community_id = community.id,
            parent_id = ?community.parent_id,
            "Community created"
        );

        self.tree.trigger_refresh();
        Ok(community)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryStore, MockCommunityStore};
    use std::time::Duration;

    #[tokio::test]
    async fn blank_name_is_rejected_without_writing() {
        let store = MockCommunityStore::new();
        let tree = Arc::new(CommunityTreeCache::new(
            Arc::new(MockCommunityStore::new()),
            Duration::from_secs(1),
        ));
        let service = CommunityService::new(Arc::new(store), tree);

        let err = service.create_community("   ", None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn creation_eventually_shows_in_the_tree() {
        let store = InMemoryStore::new();
        let tree = CommunityTreeCache::initialize(Arc::new(store.clone()), Duration::from_secs(1))
            .await
            .unwrap();
        let service = CommunityService::new(Arc::new(store), tree.clone());

        let root = service.create_community("rust", None).await.unwrap();
        let child = service
            .create_community("async", Some(root.id))
            .await
            .unwrap();

        let mut children = Vec::new();
        for _ in 0..100 {
            children = tree.position(root.id).children;
            if !children.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(children, vec![child]);
    }

    #[tokio::test]
    async fn rebuild_failure_is_not_returned_to_the_caller() {
        let mut store = MockCommunityStore::new();
        store.expect_create_community().returning(|name, parent_id| {
            Ok(Community {
                id: 1,
                name: name.to_string(),
                parent_id,
                created_at: chrono::Utc::now(),
            })
        });
        store
            .expect_list_communities()
            .returning(|| Err(AppError::StorageUnavailable("down".to_string())));
        let store = Arc::new(store);
        let tree = Arc::new(CommunityTreeCache::new(store.clone(), Duration::from_secs(1)));
        let service = CommunityService::new(store, tree);

        let created = service.create_community("news", None).await.unwrap();
        assert_eq!(created.id, 1);
    }
}
