/// Database access layer
///
/// This module provides:
/// - The storage traits the feed, vote ledger and community tree consume
/// - PostgreSQL repositories implementing them
/// - An in-memory store for tests and local runs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{Community, PopularityKey, Post, RecencyKey, UserId, Visibility};

pub mod community_repo;
pub mod memory;
pub mod post_repo;
pub mod subscription_repo;
pub mod vote_repo;

pub use community_repo::CommunityRepository;
pub use memory::InMemoryStore;
pub use post_repo::PostRepository;
pub use subscription_repo::SubscriptionRepository;
pub use vote_repo::VoteRepository;

/// Ordering and keyset position of a post listing.
#[derive(Debug, Clone, PartialEq)]
pub enum Paging {
    /// `created_at DESC, id DESC`, strictly after `after` when set
    ByRecency { after: Option<RecencyKey> },
    /// `vote_total DESC, id DESC`, strictly after `after` when set.
    /// `since` only filters on creation time.
    ByPopularity {
        after: Option<PopularityKey>,
        since: Option<DateTime<Utc>>,
    },
}

/// Filtered, ordered and limited post listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PostsListQuery {
    pub paging: Paging,
    /// `Some(vec![])` matches nothing
    pub community_ids: Option<Vec<i64>>,
    pub by_user: Option<UserId>,
    pub visibility: Option<Visibility>,
    /// Attach this viewer's own vote to each post
    pub vote_history_of: Option<UserId>,
    pub limit: i64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Run a keyset listing; rows come back in the listing's order.
    async fn list_posts(&self, query: &PostsListQuery) -> Result<Vec<Post>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn subscribed_community_ids(&self, user: &UserId) -> Result<Vec<i64>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommunityStore: Send + Sync {
    /// Bulk read of every community row.
    async fn list_communities(&self) -> Result<Vec<Community>>;

    async fn create_community(&self, name: &str, parent_id: Option<i64>) -> Result<Community>;
}

/// Opens the transaction a single vote application runs in.
#[async_trait]
pub trait VoteStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn VoteUnitOfWork>>;
}

/// One vote transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait VoteUnitOfWork: Send {
    /// Read the voter's existing vote on the target and hold its row lock
    /// until the unit of work ends.
    async fn lock_existing(&mut self, voter: &UserId, target_id: i64) -> Result<Option<i16>>;

    async fn insert_vote(&mut self, voter: &UserId, target_id: i64, value: i16) -> Result<()>;

    async fn update_vote(&mut self, voter: &UserId, target_id: i64, value: i16) -> Result<()>;

    async fn delete_vote(&mut self, voter: &UserId, target_id: i64) -> Result<()>;

    /// Apply relative deltas to the target's `{count, total}`. Fails with
    /// `NotFound` when the target does not exist.
    async fn adjust_aggregate(
        &mut self,
        target_id: i64,
        delta_total: i64,
        delta_count: i64,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Create the PostgreSQL pool used by every repository.
pub async fn create_pool(config: &DatabaseConfig) -> std::result::Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "PostgreSQL pool created"
    );

    if config.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
    }

    Ok(pool)
}
