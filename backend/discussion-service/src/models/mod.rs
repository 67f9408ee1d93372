/// Data models for discussion-service
///
/// Posts, votes, communities and subscriptions as they cross the storage
/// boundary. Storage owns these rows; the service only reads them, except for
/// the vote aggregate which the vote ledger maintains.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a viewer or author, as issued by the upstream identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who may see the author of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Normal,
    Hidden,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Normal => "NORMAL",
            Visibility::Hidden => "HIDDEN",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(Visibility::Normal),
            "HIDDEN" => Ok(Visibility::Hidden),
            other => Err(format!("unknown visibility '{}'", other)),
        }
    }
}

/// Running summary of the persisted votes on a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteAggregate {
    /// Number of persisted (non-zero) votes
    pub count: i64,
    /// Sum of persisted vote values
    pub total: i64,
}

/// A post as returned by feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub author_id: UserId,
    pub title: String,
    pub content: String,
    pub visibility: Visibility,
    pub community_ids: Vec<i64>,
    pub votes: VoteAggregate,
    /// The requesting viewer's own vote on this post, if any
    pub viewer_vote: Option<i16>,
    pub created_at: DateTime<Utc>,
}

/// Last-seen position in a recency-ordered feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyKey {
    pub created_at: DateTime<Utc>,
    pub id: i64,
}

/// Last-seen position in a popularity-ordered feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopularityKey {
    pub vote_total: i64,
    pub id: i64,
}

impl Post {
    pub fn recency_key(&self) -> RecencyKey {
        RecencyKey {
            created_at: self.created_at,
            id: self.id,
        }
    }

    pub fn popularity_key(&self) -> PopularityKey {
        PopularityKey {
            vote_total: self.votes.total,
            id: self.id,
        }
    }
}

/// A node of the community hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Where a community sits in the hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommunityPosition {
    /// Direct children, possibly empty
    pub children: Vec<Community>,
    /// Ancestors ordered from the root down to the direct parent
    pub path: Vec<Community>,
}

/// One page of a feed together with the token for the next page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    pub posts: Vec<Post>,
    pub cursor: Option<String>,
}
