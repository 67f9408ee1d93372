//! Feed cursors and their wire codec
//!
//! A cursor is one of four variants (ordering strategy x subscription scope).
//! Every variant carries a [`PagingFilter`] by value plus its own keyset
//! position. On the wire a cursor is the JSON envelope
//! `{"tag": ..., "payload": {...}}`, base64url-encoded behind a version
//! prefix so clients treat it as opaque.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Paging, PostsListQuery};
use crate::error::{AppError, Result};
use crate::models::{PopularityKey, Post, RecencyKey, UserId, Visibility};

/// Prefix of every token issued by this version of the codec.
pub const CURSOR_VERSION_PREFIX: &str = "v1.";

/// Ordering strategy tag, also accepted on its own to start a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedOrder {
    ByRecency,
    ByPopularity,
    ByRecencySubscribed,
    ByPopularitySubscribed,
}

impl FeedOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedOrder::ByRecency => "by-recency",
            FeedOrder::ByPopularity => "by-popularity",
            FeedOrder::ByRecencySubscribed => "by-recency-subscribed",
            FeedOrder::ByPopularitySubscribed => "by-popularity-subscribed",
        }
    }
}

/// Filters frozen into a cursor for the lifetime of a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagingFilter {
    /// Community scope; `None` means every community
    pub communities: Option<Vec<i64>>,
    pub by_user: Option<UserId>,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecencyCursor {
    pub filter: PagingFilter,
    /// `None` on the first page
    pub last: Option<RecencyKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopularityCursor {
    pub filter: PagingFilter,
    /// Only posts created strictly after this instant
    pub since: Option<DateTime<Utc>>,
    /// `None` on the first page
    pub last: Option<PopularityKey>,
}

/// Position and frozen filters of a feed in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCursor {
    ByRecency(RecencyCursor),
    ByPopularity(PopularityCursor),
    ByRecencySubscribed(RecencyCursor),
    ByPopularitySubscribed(PopularityCursor),
}

impl FeedCursor {
    /// First-page cursor for `order`. `since` is only meaningful for the
    /// popularity orderings.
    pub fn start(
        order: FeedOrder,
        filter: PagingFilter,
        since: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let recency = |filter| -> Result<RecencyCursor> {
            if since.is_some() {
                return Err(AppError::InvalidArgument(format!(
                    "'since' is not supported by {}",
                    order.as_str()
                )));
            }
            Ok(RecencyCursor { filter, last: None })
        };
        let popularity = |filter| PopularityCursor {
            filter,
            since,
            last: None,
        };

        Ok(match order {
            FeedOrder::ByRecency => FeedCursor::ByRecency(recency(filter)?),
            FeedOrder::ByPopularity => FeedCursor::ByPopularity(popularity(filter)),
            FeedOrder::ByRecencySubscribed => FeedCursor::ByRecencySubscribed(recency(filter)?),
            FeedOrder::ByPopularitySubscribed => {
                FeedCursor::ByPopularitySubscribed(popularity(filter))
            }
        })
    }

    pub fn order(&self) -> FeedOrder {
        match self {
            FeedCursor::ByRecency(_) => FeedOrder::ByRecency,
            FeedCursor::ByPopularity(_) => FeedOrder::ByPopularity,
            FeedCursor::ByRecencySubscribed(_) => FeedOrder::ByRecencySubscribed,
            FeedCursor::ByPopularitySubscribed(_) => FeedOrder::ByPopularitySubscribed,
        }
    }

    pub fn filter(&self) -> &PagingFilter {
        match self {
            FeedCursor::ByRecency(c) | FeedCursor::ByRecencySubscribed(c) => &c.filter,
            FeedCursor::ByPopularity(c) | FeedCursor::ByPopularitySubscribed(c) => &c.filter,
        }
    }

    /// Storage query for the page this cursor points at.
    pub fn to_query(&self, limit: i64, viewer: Option<&UserId>) -> PostsListQuery {
        let paging = match self {
            FeedCursor::ByRecency(c) | FeedCursor::ByRecencySubscribed(c) => {
                Paging::ByRecency { after: c.last }
            }
            FeedCursor::ByPopularity(c) | FeedCursor::ByPopularitySubscribed(c) => {
                Paging::ByPopularity {
                    after: c.last,
                    since: c.since,
                }
            }
        };
        let filter = self.filter();

        PostsListQuery {
            paging,
            community_ids: filter.communities.clone(),
            by_user: filter.by_user.clone(),
            visibility: filter.visibility,
            vote_history_of: viewer.cloned(),
            limit,
        }
    }

    /// Cursor for the page after `last`, keeping variant and filters.
    pub fn after(&self, last: &Post) -> Self {
        match self {
            FeedCursor::ByRecency(c) => FeedCursor::ByRecency(c.after(last)),
            FeedCursor::ByPopularity(c) => FeedCursor::ByPopularity(c.after(last)),
            FeedCursor::ByRecencySubscribed(c) => FeedCursor::ByRecencySubscribed(c.after(last)),
            FeedCursor::ByPopularitySubscribed(c) => {
                FeedCursor::ByPopularitySubscribed(c.after(last))
            }
        }
    }

    pub fn encode(&self) -> String {
        encode(self)
    }
}

impl RecencyCursor {
    fn after(&self, last: &Post) -> Self {
        Self {
            filter: self.filter.clone(),
            last: Some(last.recency_key()),
        }
    }
}

impl PopularityCursor {
    fn after(&self, last: &Post) -> Self {
        Self {
            filter: self.filter.clone(),
            since: self.since,
            last: Some(last.popularity_key()),
        }
    }
}

// ----- wire format -----

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "tag", content = "payload", rename_all = "kebab-case")]
enum WireCursor {
    ByRecency(WirePayload),
    ByPopularity(WirePayload),
    ByRecencySubscribed(WirePayload),
    ByPopularitySubscribed(WirePayload),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WirePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    communities: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_vote_total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    since: Option<DateTime<Utc>>,
    last_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    by_user: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    visibility: Option<Visibility>,
}

impl WirePayload {
    fn from_filter(filter: &PagingFilter) -> Self {
        Self {
            communities: filter.communities.clone(),
            by_user: filter.by_user.clone(),
            visibility: filter.visibility,
            ..Default::default()
        }
    }

    fn filter(&self) -> PagingFilter {
        PagingFilter {
            communities: self.communities.clone(),
            by_user: self.by_user.clone(),
            visibility: self.visibility,
        }
    }

    /// `lastId` is empty exactly when the ordering key is absent.
    fn last_id(&self, has_key: bool) -> Result<Option<i64>> {
        match (has_key, self.last_id.is_empty()) {
            (false, true) => Ok(None),
            (true, false) => self
                .last_id
                .parse::<i64>()
                .map(Some)
                .map_err(|_| AppError::InvalidCursor(format!("lastId '{}' is not a post id", self.last_id))),
            (true, true) => Err(AppError::InvalidCursor(
                "ordering key present without lastId".to_string(),
            )),
            (false, false) => Err(AppError::InvalidCursor(
                "lastId present without an ordering key".to_string(),
            )),
        }
    }

    fn into_recency(self, tag: &str) -> Result<RecencyCursor> {
        if self.last_vote_total.is_some() || self.since.is_some() {
            return Err(AppError::InvalidCursor(format!(
                "{} cursor carries popularity fields",
                tag
            )));
        }
        let last = match (self.last_timestamp, self.last_id(self.last_timestamp.is_some())?) {
            (Some(created_at), Some(id)) => Some(RecencyKey { created_at, id }),
            _ => None,
        };
        Ok(RecencyCursor {
            filter: self.filter(),
            last,
        })
    }

    fn into_popularity(self, tag: &str) -> Result<PopularityCursor> {
        if self.last_timestamp.is_some() {
            return Err(AppError::InvalidCursor(format!(
                "{} cursor carries lastTimestamp",
                tag
            )));
        }
        let last = match (self.last_vote_total, self.last_id(self.last_vote_total.is_some())?) {
            (Some(vote_total), Some(id)) => Some(PopularityKey { vote_total, id }),
            _ => None,
        };
        Ok(PopularityCursor {
            filter: self.filter(),
            since: self.since,
            last,
        })
    }
}

impl From<&RecencyCursor> for WirePayload {
    fn from(cursor: &RecencyCursor) -> Self {
        let mut payload = WirePayload::from_filter(&cursor.filter);
        if let Some(last) = cursor.last {
            payload.last_timestamp = Some(last.created_at);
            payload.last_id = last.id.to_string();
        }
        payload
    }
}

impl From<&PopularityCursor> for WirePayload {
    fn from(cursor: &PopularityCursor) -> Self {
        let mut payload = WirePayload::from_filter(&cursor.filter);
        payload.since = cursor.since;
        if let Some(last) = cursor.last {
            payload.last_vote_total = Some(last.vote_total);
            payload.last_id = last.id.to_string();
        }
        payload
    }
}

impl From<&FeedCursor> for WireCursor {
    fn from(cursor: &FeedCursor) -> Self {
        match cursor {
            FeedCursor::ByRecency(c) => WireCursor::ByRecency(c.into()),
            FeedCursor::ByPopularity(c) => WireCursor::ByPopularity(c.into()),
            FeedCursor::ByRecencySubscribed(c) => WireCursor::ByRecencySubscribed(c.into()),
            FeedCursor::ByPopularitySubscribed(c) => WireCursor::ByPopularitySubscribed(c.into()),
        }
    }
}

impl TryFrom<WireCursor> for FeedCursor {
    type Error = AppError;

    fn try_from(wire: WireCursor) -> Result<Self> {
        Ok(match wire {
            WireCursor::ByRecency(p) => {
                FeedCursor::ByRecency(p.into_recency(FeedOrder::ByRecency.as_str())?)
            }
            WireCursor::ByPopularity(p) => {
                FeedCursor::ByPopularity(p.into_popularity(FeedOrder::ByPopularity.as_str())?)
            }
            WireCursor::ByRecencySubscribed(p) => FeedCursor::ByRecencySubscribed(
                p.into_recency(FeedOrder::ByRecencySubscribed.as_str())?,
            ),
            WireCursor::ByPopularitySubscribed(p) => FeedCursor::ByPopularitySubscribed(
                p.into_popularity(FeedOrder::ByPopularitySubscribed.as_str())?,
            ),
        })
    }
}

/// Serialize a cursor into an opaque token.
pub fn encode(cursor: &FeedCursor) -> String {
    let wire = WireCursor::from(cursor);
    // Serializing plain structs of strings and numbers cannot fail
    let json = serde_json::to_vec(&wire).unwrap_or_default();
    format!("{}{}", CURSOR_VERSION_PREFIX, URL_SAFE_NO_PAD.encode(json))
}

/// Parse a token previously produced by [`encode`].
pub fn decode(token: &str) -> Result<FeedCursor> {
    let body = token
        .strip_prefix(CURSOR_VERSION_PREFIX)
        .ok_or_else(|| AppError::InvalidCursor("unsupported cursor version".to_string()))?;
    let json = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|e| AppError::InvalidCursor(format!("cursor is not base64url: {}", e)))?;
    decode_json(&json)
}

/// Parse the bare JSON envelope (`{"tag": ..., "payload": ...}`).
pub fn decode_json(json: &[u8]) -> Result<FeedCursor> {
    let wire: WireCursor = serde_json::from_slice(json)?;
    FeedCursor::try_from(wire)
}
