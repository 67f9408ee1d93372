use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::{VoteStore, VoteUnitOfWork};
use crate::error::{AppError, Result};
use crate::models::UserId;

/// Repository for vote rows and the aggregate columns on `posts`
#[derive(Clone)]
pub struct VoteRepository {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl VoteRepository {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }
}

#[async_trait]
impl VoteStore for VoteRepository {
    async fn begin(&self) -> Result<Box<dyn VoteUnitOfWork>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;
        // SET LOCAL cannot take bind parameters
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgVoteUnitOfWork { tx }))
    }
}

/// A vote transaction on PostgreSQL. Rolled back by sqlx when dropped
/// uncommitted.
pub struct PgVoteUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl VoteUnitOfWork for PgVoteUnitOfWork {
    async fn lock_existing(&mut self, voter: &UserId, target_id: i64) -> Result<Option<i16>> {
        let value: Option<i16> = sqlx::query_scalar(
            r#"
            SELECT value FROM votes
            WHERE target_id = $1 AND voter_id = $2
            FOR UPDATE
            "#,
        )
        .bind(target_id)
        .bind(voter.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(AppError::from_vote_tx)?;

        Ok(value)
    }

    async fn insert_vote(&mut self, voter: &UserId, target_id: i64, value: i16) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO votes (voter_id, target_id, value)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(voter.as_str())
        .bind(target_id)
        .bind(value)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from_vote_tx)?;

        Ok(())
    }

    async fn update_vote(&mut self, voter: &UserId, target_id: i64, value: i16) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE votes
            SET value = $1, updated_at = NOW()
            WHERE target_id = $2 AND voter_id = $3
            "#,
        )
        .bind(value)
        .bind(target_id)
        .bind(voter.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from_vote_tx)?;

        Ok(())
    }

    async fn delete_vote(&mut self, voter: &UserId, target_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM votes
            WHERE target_id = $1 AND voter_id = $2
            "#,
        )
        .bind(target_id)
        .bind(voter.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from_vote_tx)?;

        Ok(())
    }

    async fn adjust_aggregate(
        &mut self,
        target_id: i64,
        delta_total: i64,
        delta_count: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET vote_total = vote_total + $1,
                num_votes = num_votes + $2,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(delta_total)
        .bind(delta_count)
        .bind(target_id)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from_vote_tx)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("post {}", target_id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(AppError::from_vote_tx)
    }
}
