use async_trait::async_trait;
use sqlx::PgPool;

use super::CommunityStore;
use crate::error::{AppError, Result};
use crate::models::Community;

/// Repository for the community hierarchy
#[derive(Clone)]
pub struct CommunityRepository {
    pool: PgPool,
}

impl CommunityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommunityStore for CommunityRepository {
    async fn list_communities(&self) -> Result<Vec<Community>> {
        let communities = sqlx::query_as::<_, Community>(
            r#"
            SELECT id, name, parent_id, created_at
            FROM communities
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(communities)
    }

    async fn create_community(&self, name: &str, parent_id: Option<i64>) -> Result<Community> {
        let community = sqlx::query_as::<_, Community>(
            r#"
            INSERT INTO communities (name, parent_id)
            VALUES ($1, $2)
            RETURNING id, name, parent_id, created_at
            "#,
        )
        .bind(name)
        .bind(parent_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let code = e
                .as_database_error()
                .and_then(|db| db.code())
                .map(|c| c.into_owned());
            match code.as_deref() {
                Some("23505") => {
                    AppError::InvalidArgument(format!("community '{}' already exists", name))
                }
                Some("23503") => AppError::NotFound(format!(
                    "parent community {}",
                    parent_id.unwrap_or_default()
                )),
                _ => AppError::from(e),
            }
        })?;

        Ok(community)
    }
}
