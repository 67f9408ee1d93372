use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::{Paging, PostStore, PostsListQuery};
use crate::error::Result;
use crate::models::{Post, UserId, Visibility, VoteAggregate};

/// Repository for feed listings over `posts`
#[derive(Clone)]
pub struct PostRepository {
    pool: PgPool,
}

impl PostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PostStore for PostRepository {
    async fn list_posts(&self, query: &PostsListQuery) -> Result<Vec<Post>> {
        if matches!(&query.community_ids, Some(ids) if ids.is_empty()) {
            return Ok(Vec::new());
        }

        let mut builder = build_list_query(query);
        let rows = builder.build().fetch_all(&self.pool).await?;

        let posts = rows
            .iter()
            .map(post_from_row)
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
        Ok(posts)
    }
}

/// Build the keyset listing. The keyset bound uses a row comparison so the
/// `(key, id)` index can serve it directly.
fn build_list_query(query: &PostsListQuery) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(
        r#"
        SELECT p.id, p.author_id, p.title, p.content, p.visibility,
               p.vote_total, p.num_votes, p.created_at,
               ARRAY(
                   SELECT pc.community_id FROM post_communities pc
                   WHERE pc.post_id = p.id ORDER BY pc.community_id
               ) AS community_ids,
        "#,
    );

    match &query.vote_history_of {
        Some(viewer) => {
            builder.push(" v.value AS viewer_vote FROM posts p LEFT JOIN votes v ON v.target_id = p.id AND v.voter_id = ");
            builder.push_bind(viewer.as_str());
        }
        None => {
            builder.push(" NULL::SMALLINT AS viewer_vote FROM posts p");
        }
    }

    builder.push(" WHERE p.status <> 'DELETED'");

    let order_by = match &query.paging {
        Paging::ByRecency { after } => {
            if let Some(after) = after {
                builder.push(" AND (p.created_at, p.id) < (");
                builder.push_bind(after.created_at);
                builder.push(", ");
                builder.push_bind(after.id);
                builder.push(")");
            }
            " ORDER BY p.created_at DESC, p.id DESC"
        }
        Paging::ByPopularity { after, since } => {
            if let Some(since) = since {
                builder.push(" AND p.created_at > ");
                builder.push_bind(*since);
            }
            if let Some(after) = after {
                builder.push(" AND (p.vote_total, p.id) < (");
                builder.push_bind(after.vote_total);
                builder.push(", ");
                builder.push_bind(after.id);
                builder.push(")");
            }
            " ORDER BY p.vote_total DESC, p.id DESC"
        }
    };

    if let Some(ids) = &query.community_ids {
        builder.push(
            " AND EXISTS (SELECT 1 FROM post_communities pc WHERE pc.post_id = p.id AND pc.community_id = ANY(",
        );
        builder.push_bind(ids.clone());
        builder.push("))");
    }

    if let Some(author) = &query.by_user {
        builder.push(" AND p.author_id = ");
        builder.push_bind(author.as_str());
    }

    if let Some(visibility) = query.visibility {
        builder.push(" AND p.visibility = ");
        builder.push_bind(visibility.as_str());
    }

    builder.push(order_by);
    builder.push(" LIMIT ");
    builder.push_bind(query.limit);

    builder
}

fn post_from_row(row: &PgRow) -> std::result::Result<Post, sqlx::Error> {
    let visibility: String = row.try_get("visibility")?;
    let visibility = visibility
        .parse::<Visibility>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    Ok(Post {
        id: row.try_get("id")?,
        author_id: UserId(row.try_get("author_id")?),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        visibility,
        community_ids: row.try_get("community_ids")?,
        votes: VoteAggregate {
            count: row.try_get("num_votes")?,
            total: row.try_get("vote_total")?,
        },
        viewer_vote: row.try_get("viewer_vote")?,
        created_at: row.try_get("created_at")?,
    })
}
