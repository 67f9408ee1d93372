use async_trait::async_trait;
use sqlx::PgPool;

use super::SubscriptionStore;
use crate::error::Result;
use crate::models::UserId;

/// Repository for community subscriptions
#[derive(Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for SubscriptionRepository {
    async fn subscribed_community_ids(&self, user: &UserId) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT community_id
            FROM subscriptions
            WHERE user_id = $1
            ORDER BY community_id
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
