//! Feed pagination
//!
//! Pages are keyset-paginated: each request carries the last item's
//! `(ordering key, id)` and storage returns rows strictly after it. Filters
//! travel inside the cursor, so a feed keeps the scope it started with.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::db::{PostStore, SubscriptionStore};
use crate::error::{AppError, Result};
use crate::metrics::feed::{FEED_FETCH_DURATION_SECONDS, FEED_FETCH_TOTAL, FEED_PAGE_SIZE};
use crate::models::{FeedResponse, Post, UserId};
use crate::services::RequestContext;

pub mod cursor;

pub use cursor::{FeedCursor, FeedOrder, PagingFilter, PopularityCursor, RecencyCursor};

/// One page of a feed.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub items: Vec<Post>,
    /// Cursor for the following page; `None` once the feed is exhausted
    pub next_cursor: Option<FeedCursor>,
}

impl From<FeedPage> for FeedResponse {
    fn from(page: FeedPage) -> Self {
        FeedResponse {
            posts: page.items,
            cursor: page.next_cursor.as_ref().map(cursor::encode),
        }
    }
}

pub struct FeedService {
    posts: Arc<dyn PostStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl FeedService {
    pub fn new(posts: Arc<dyn PostStore>, subscriptions: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            posts,
            subscriptions,
        }
    }

    /// Fetch the page `cursor` points at.
    pub async fn fetch(
        &self,
        cursor: &FeedCursor,
        limit: i64,
        viewer: Option<&UserId>,
        ctx: &RequestContext,
    ) -> Result<FeedPage> {
        let order = cursor.order().as_str();
        let start = Instant::now();

        let result = ctx.run(self.fetch_page(cursor, limit, viewer)).await;

        FEED_FETCH_DURATION_SECONDS
            .with_label_values(&[order])
            .observe(start.elapsed().as_secs_f64());
        match &result {
            Ok(page) => {
                FEED_FETCH_TOTAL.with_label_values(&[order, "ok"]).inc();
                FEED_PAGE_SIZE
                    .with_label_values(&[order])
                    .observe(page.items.len() as f64);
            }
            Err(e) => {
                FEED_FETCH_TOTAL.with_label_values(&[order, "error"]).inc();
                warn!(order = order, error = %e, "Feed fetch failed");
            }
        }

        result
    }

    /// Continue a feed from an opaque token, or start `order` unfiltered when
    /// no token is given. A token issued for another ordering is rejected.
    pub async fn fetch_token(
        &self,
        token: Option<&str>,
        order: FeedOrder,
        limit: i64,
        viewer: Option<&UserId>,
        ctx: &RequestContext,
    ) -> Result<FeedResponse> {
        let cursor = match token {
            Some(token) => {
                let cursor = cursor::decode(token)?;
                if cursor.order() != order {
                    return Err(AppError::InvalidCursor(format!(
                        "cursor was issued for {}, not {}",
                        cursor.order().as_str(),
                        order.as_str()
                    )));
                }
                cursor
            }
            None => FeedCursor::start(order, PagingFilter::default(), None)?,
        };

        let page = self.fetch(&cursor, limit, viewer, ctx).await?;
        Ok(page.into())
    }

    async fn fetch_page(
        &self,
        cursor: &FeedCursor,
        limit: i64,
        viewer: Option<&UserId>,
    ) -> Result<FeedPage> {
        if limit <= 0 {
            return Err(AppError::InvalidArgument(format!(
                "limit must be positive, got {}",
                limit
            )));
        }

        let cursor = match cursor {
            FeedCursor::ByRecency(_) | FeedCursor::ByPopularity(_) => cursor.clone(),
            FeedCursor::ByRecencySubscribed(c) => {
                FeedCursor::ByRecencySubscribed(RecencyCursor {
                    filter: self.subscription_scope(&c.filter, viewer).await?,
                    last: c.last,
                })
            }
            FeedCursor::ByPopularitySubscribed(c) => {
                FeedCursor::ByPopularitySubscribed(PopularityCursor {
                    filter: self.subscription_scope(&c.filter, viewer).await?,
                    since: c.since,
                    last: c.last,
                })
            }
        };

        let items = self.posts.list_posts(&cursor.to_query(limit, viewer)).await?;
        let next_cursor = items.last().map(|last| cursor.after(last));

        debug!(
            order = cursor.order().as_str(),
            items = items.len(),
            has_next = next_cursor.is_some(),
            "Feed page fetched"
        );

        Ok(FeedPage { items, next_cursor })
    }

    /// Resolve the viewer's subscriptions into the filter unless a previous
    /// page already froze them.
    async fn subscription_scope(
        &self,
        filter: &PagingFilter,
        viewer: Option<&UserId>,
    ) -> Result<PagingFilter> {
        let viewer = viewer.ok_or_else(|| {
            AppError::Unauthenticated("subscribed feeds require a viewer".to_string())
        })?;

        if filter.communities.is_some() {
            return Ok(filter.clone());
        }

        let communities = self.subscriptions.subscribed_community_ids(viewer).await?;
        debug!(
            viewer = %viewer,
            communities = communities.len(),
            "Froze subscription scope"
        );

        Ok(PagingFilter {
            communities: Some(communities),
            ..filter.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::NewPost;
    use crate::db::{InMemoryStore, MockPostStore, MockSubscriptionStore};
    use crate::models::Visibility;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashSet;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn service(store: &InMemoryStore) -> FeedService {
        FeedService::new(Arc::new(store.clone()), Arc::new(store.clone()))
    }

    async fn drain(
        service: &FeedService,
        start: FeedCursor,
        limit: i64,
        viewer: Option<&UserId>,
    ) -> Vec<Post> {
        let ctx = RequestContext::background();
        let mut seen = Vec::new();
        let mut cursor = start;
        loop {
            let page = service.fetch(&cursor, limit, viewer, &ctx).await.unwrap();
            seen.extend(page.items);
            match page.next_cursor {
                // Go through the wire format like a client would
                Some(next) => cursor = cursor::decode(&next.encode()).unwrap(),
                None => break,
            }
        }
        seen
    }

    /// Many posts sharing timestamps so ties on the ordering key are common.
    fn seed_with_ties(store: &InMemoryStore) -> Vec<i64> {
        (0..23)
            .map(|i| store.insert_post(NewPost::new(format!("author-{}", i % 3), t(i / 4))))
            .collect()
    }

    #[tokio::test]
    async fn recency_pages_cover_every_post_once() {
        let store = InMemoryStore::new();
        let ids = seed_with_ties(&store);
        let service = service(&store);

        let start = FeedCursor::start(FeedOrder::ByRecency, PagingFilter::default(), None).unwrap();
        let seen = drain(&service, start, 4, None).await;

        let seen_ids: Vec<i64> = seen.iter().map(|p| p.id).collect();
        assert_eq!(seen_ids.len(), ids.len());
        assert_eq!(seen_ids.iter().collect::<HashSet<_>>().len(), ids.len());
        assert!(seen
            .windows(2)
            .all(|w| (w[0].created_at, w[0].id) > (w[1].created_at, w[1].id)));
    }

    #[tokio::test]
    async fn popularity_pages_cover_every_post_once() {
        let store = InMemoryStore::new();
        let ids = seed_with_ties(&store);
        let ledger_store: Arc<dyn crate::db::VoteStore> = Arc::new(store.clone());
        let ledger = crate::services::VoteLedger::new(ledger_store, &Default::default());
        let ctx = RequestContext::background();
        for (n, id) in ids.iter().enumerate() {
            // totals in {-1, 0, 1} give heavy ties
            let value = (n % 3) as i64 - 1;
            ledger
                .apply_vote(&UserId::new("voter"), *id, value, &ctx)
                .await
                .unwrap();
        }
        let service = service(&store);

        let start =
            FeedCursor::start(FeedOrder::ByPopularity, PagingFilter::default(), None).unwrap();
        let seen = drain(&service, start, 5, None).await;

        assert_eq!(seen.len(), ids.len());
        assert_eq!(
            seen.iter().map(|p| p.id).collect::<HashSet<_>>().len(),
            ids.len()
        );
        assert!(seen
            .windows(2)
            .all(|w| (w[0].votes.total, w[0].id) > (w[1].votes.total, w[1].id)));
    }

    #[tokio::test]
    async fn since_filters_without_changing_order() {
        let store = InMemoryStore::new();
        seed_with_ties(&store);
        let service = service(&store);

        let start = FeedCursor::start(
            FeedOrder::ByPopularity,
            PagingFilter::default(),
            Some(t(3)),
        )
        .unwrap();
        let seen = drain(&service, start, 2, None).await;

        assert!(!seen.is_empty());
        assert!(seen.iter().all(|p| p.created_at > t(3)));
    }

    #[tokio::test]
    async fn page_past_the_end_is_empty_and_terminal() {
        let store = InMemoryStore::new();
        store.insert_post(NewPost::new("a", t(0)));
        let service = service(&store);
        let ctx = RequestContext::background();

        let start = FeedCursor::start(FeedOrder::ByRecency, PagingFilter::default(), None).unwrap();
        let first = service.fetch(&start, 10, None, &ctx).await.unwrap();
        assert_eq!(first.items.len(), 1);

        let next = first.next_cursor.expect("non-empty page has a next cursor");
        let last = service.fetch(&next, 10, None, &ctx).await.unwrap();
        assert!(last.items.is_empty());
        assert!(last.next_cursor.is_none());
    }

    #[tokio::test]
    async fn subscription_scope_is_frozen_for_the_whole_feed() {
        let store = InMemoryStore::new();
        let viewer = UserId::new("viewer");
        store.subscribe(&viewer, 1);
        store.subscribe(&viewer, 2);
        for i in 0..6 {
            store.insert_post(NewPost::new("a", t(i)).in_communities(vec![1 + i % 3]));
        }
        let service = service(&store);
        let ctx = RequestContext::background();

        let start = FeedCursor::start(
            FeedOrder::ByRecencySubscribed,
            PagingFilter::default(),
            None,
        )
        .unwrap();
        let first = service.fetch(&start, 2, Some(&viewer), &ctx).await.unwrap();
        let next = first.next_cursor.unwrap();
        assert_eq!(next.filter().communities, Some(vec![1, 2]));

        store.unsubscribe(&viewer, 2);
        store.subscribe(&viewer, 3);

        let rest = drain(&service, next, 2, Some(&viewer)).await;
        assert!(first
            .items
            .iter()
            .chain(rest.iter())
            .all(|p| p.community_ids.iter().any(|c| *c == 1 || *c == 2)));
        assert_eq!(first.items.len() + rest.len(), 4);
    }

    #[tokio::test]
    async fn subscriptions_are_resolved_once_per_feed() {
        let mut subscriptions = MockSubscriptionStore::new();
        subscriptions
            .expect_subscribed_community_ids()
            .times(1)
            .returning(|_| Ok(vec![7]));

        let mut posts = MockPostStore::new();
        posts.expect_list_posts().times(2).returning(|query| {
            assert_eq!(query.community_ids, Some(vec![7]));
            Ok(vec![Post {
                id: 100 - query.limit,
                author_id: UserId::new("a"),
                title: "t".to_string(),
                content: String::new(),
                visibility: Visibility::Normal,
                community_ids: vec![7],
                votes: Default::default(),
                viewer_vote: None,
                created_at: t(0),
            }])
        });

        let service = FeedService::new(Arc::new(posts), Arc::new(subscriptions));
        let viewer = UserId::new("viewer");
        let ctx = RequestContext::background();

        let start = FeedCursor::start(
            FeedOrder::ByPopularitySubscribed,
            PagingFilter::default(),
            None,
        )
        .unwrap();
        let first = service.fetch(&start, 1, Some(&viewer), &ctx).await.unwrap();
        service
            .fetch(&first.next_cursor.unwrap(), 1, Some(&viewer), &ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_subscriptions_give_an_empty_terminal_page() {
        let store = InMemoryStore::new();
        store.insert_post(NewPost::new("a", t(0)).in_communities(vec![1]));
        let service = service(&store);
        let viewer = UserId::new("lurker");

        let start = FeedCursor::start(
            FeedOrder::ByRecencySubscribed,
            PagingFilter::default(),
            None,
        )
        .unwrap();
        let page = service
            .fetch(&start, 10, Some(&viewer), &RequestContext::background())
            .await
            .unwrap();

        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn scoped_feed_without_viewer_fails_before_io() {
        let service = FeedService::new(
            Arc::new(MockPostStore::new()),
            Arc::new(MockSubscriptionStore::new()),
        );
        let start = FeedCursor::start(
            FeedOrder::ByRecencySubscribed,
            PagingFilter::default(),
            None,
        )
        .unwrap();

        let err = service
            .fetch(&start, 10, None, &RequestContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn non_positive_limit_is_rejected() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let start = FeedCursor::start(FeedOrder::ByRecency, PagingFilter::default(), None).unwrap();

        for limit in [0, -5] {
            let err = service
                .fetch(&start, limit, None, &RequestContext::background())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidArgument(_)));
        }
    }

    #[tokio::test]
    async fn filters_survive_into_next_cursor() {
        let store = InMemoryStore::new();
        for i in 0..4 {
            let visibility = if i % 2 == 0 {
                Visibility::Hidden
            } else {
                Visibility::Normal
            };
            store.insert_post(NewPost::new("author-x", t(i)).with_visibility(visibility));
        }
        store.insert_post(NewPost::new("author-y", t(9)).with_visibility(Visibility::Hidden));
        let service = service(&store);

        let filter = PagingFilter {
            by_user: Some(UserId::new("author-x")),
            visibility: Some(Visibility::Hidden),
            ..Default::default()
        };
        let start = FeedCursor::start(FeedOrder::ByPopularity, filter.clone(), None).unwrap();
        let seen = drain(&service, start, 1, None).await;

        assert_eq!(seen.len(), 2);
        assert!(seen
            .iter()
            .all(|p| p.visibility == Visibility::Hidden && p.author_id.as_str() == "author-x"));
    }

    #[tokio::test]
    async fn token_for_another_order_is_rejected() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let token = FeedCursor::start(FeedOrder::ByRecency, PagingFilter::default(), None)
            .unwrap()
            .encode();

        let err = service
            .fetch_token(
                Some(&token),
                FeedOrder::ByPopularity,
                10,
                None,
                &RequestContext::background(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCursor(_)));
    }
}
