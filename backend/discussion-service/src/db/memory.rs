//! In-memory storage
//!
//! Implements every storage trait over a single mutex-guarded state so tests
//! and local runs exercise the same services as production. Vote units of work
//! hold a per-(voter, target) async lock for their whole lifetime and buffer
//! their writes until commit, mirroring `SELECT ... FOR UPDATE` under read
//! committed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use super::{
    CommunityStore, Paging, PostStore, PostsListQuery, SubscriptionStore, VoteStore,
    VoteUnitOfWork,
};
use crate::error::{AppError, Result};
use crate::models::{Community, Post, UserId, Visibility, VoteAggregate};

/// Fields needed to seed a post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: UserId,
    pub title: String,
    pub content: String,
    pub visibility: Visibility,
    pub community_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

impl NewPost {
    pub fn new(author_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            author_id: UserId::new(author_id),
            title: "untitled".to_string(),
            content: String::new(),
            visibility: Visibility::Normal,
            community_ids: Vec::new(),
            created_at,
        }
    }

    pub fn in_communities(mut self, community_ids: Vec<i64>) -> Self {
        self.community_ids = community_ids;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

#[derive(Default)]
struct State {
    next_post_id: i64,
    next_community_id: i64,
    posts: BTreeMap<i64, StoredPost>,
    votes: HashMap<(UserId, i64), i16>,
    communities: Vec<Community>,
    subscriptions: HashMap<UserId, BTreeSet<i64>>,
}

struct StoredPost {
    post: Post,
    deleted: bool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    row_locks: Mutex<HashMap<(UserId, i64), Arc<tokio::sync::Mutex<()>>>>,
    injected_lock_failures: AtomicU32,
}

/// Shared in-memory store; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_post(&self, new_post: NewPost) -> i64 {
        let mut state = self.inner.state.lock();
        state.next_post_id += 1;
        let id = state.next_post_id;
        state.posts.insert(
            id,
            StoredPost {
                post: Post {
                    id,
                    author_id: new_post.author_id,
                    title: new_post.title,
                    content: new_post.content,
                    visibility: new_post.visibility,
                    community_ids: new_post.community_ids,
                    votes: VoteAggregate::default(),
                    viewer_vote: None,
                    created_at: new_post.created_at,
                },
                deleted: false,
            },
        );
        id
    }

    /// Soft-delete a post; it disappears from listings.
    pub fn delete_post(&self, id: i64) {
        if let Some(stored) = self.inner.state.lock().posts.get_mut(&id) {
            stored.deleted = true;
        }
    }

    pub fn post(&self, id: i64) -> Option<Post> {
        self.inner
            .state
            .lock()
            .posts
            .get(&id)
            .map(|stored| stored.post.clone())
    }

    pub fn vote_value(&self, voter: &UserId, target_id: i64) -> Option<i16> {
        self.inner
            .state
            .lock()
            .votes
            .get(&(voter.clone(), target_id))
            .copied()
    }

    /// Number of persisted vote rows on a target.
    pub fn vote_rows(&self, target_id: i64) -> usize {
        self.inner
            .state
            .lock()
            .votes
            .keys()
            .filter(|(_, target)| *target == target_id)
            .count()
    }

    pub fn subscribe(&self, user: &UserId, community_id: i64) {
        self.inner
            .state
            .lock()
            .subscriptions
            .entry(user.clone())
            .or_default()
            .insert(community_id);
    }

    pub fn unsubscribe(&self, user: &UserId, community_id: i64) {
        if let Some(subs) = self.inner.state.lock().subscriptions.get_mut(user) {
            subs.remove(&community_id);
        }
    }

    /// Seed a community with an explicit id and creation time.
    pub fn insert_community(&self, community: Community) {
        let mut state = self.inner.state.lock();
        state.next_community_id = state.next_community_id.max(community.id);
        state.communities.push(community);
    }

    /// Make the next `n` row-lock acquisitions fail with a conflict.
    pub fn inject_lock_failures(&self, n: u32) {
        self.inner.injected_lock_failures.store(n, Ordering::SeqCst);
    }

    fn row_lock(&self, voter: &UserId, target_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .row_locks
            .lock()
            .entry((voter.clone(), target_id))
            .or_default()
            .clone()
    }
}

fn matches_query(post: &Post, query: &PostsListQuery) -> bool {
    if let Some(ids) = &query.community_ids {
        if !post.community_ids.iter().any(|id| ids.contains(id)) {
            return false;
        }
    }
    if let Some(author) = &query.by_user {
        if &post.author_id != author {
            return false;
        }
    }
    if let Some(visibility) = query.visibility {
        if post.visibility != visibility {
            return false;
        }
    }

    match &query.paging {
        Paging::ByRecency { after } => {
            after.map_or(true, |after| recency_tuple(post) < (after.created_at, after.id))
        }
        Paging::ByPopularity { after, since } => {
            let fresh = since.map_or(true, |since| post.created_at > since);
            let below = after.map_or(true, |after| {
                (post.votes.total, post.id) < (after.vote_total, after.id)
            });
            fresh && below
        }
    }
}

fn recency_tuple(post: &Post) -> (DateTime<Utc>, i64) {
    (post.created_at, post.id)
}

#[async_trait]
impl PostStore for InMemoryStore {
    async fn list_posts(&self, query: &PostsListQuery) -> Result<Vec<Post>> {
        let state = self.inner.state.lock();
        let mut posts: Vec<Post> = state
            .posts
            .values()
            .filter(|stored| !stored.deleted && matches_query(&stored.post, query))
            .map(|stored| {
                let mut post = stored.post.clone();
                post.viewer_vote = query
                    .vote_history_of
                    .as_ref()
                    .and_then(|viewer| state.votes.get(&(viewer.clone(), post.id)).copied());
                post
            })
            .collect();

        match query.paging {
            Paging::ByRecency { .. } => {
                posts.sort_by(|a, b| recency_tuple(b).cmp(&recency_tuple(a)))
            }
            Paging::ByPopularity { .. } => {
                posts.sort_by(|a, b| (b.votes.total, b.id).cmp(&(a.votes.total, a.id)))
            }
        }
        posts.truncate(query.limit.max(0) as usize);
        Ok(posts)
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn subscribed_community_ids(&self, user: &UserId) -> Result<Vec<i64>> {
        Ok(self
            .inner
            .state
            .lock()
            .subscriptions
            .get(user)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CommunityStore for InMemoryStore {
    async fn list_communities(&self) -> Result<Vec<Community>> {
        Ok(self.inner.state.lock().communities.clone())
    }

    async fn create_community(&self, name: &str, parent_id: Option<i64>) -> Result<Community> {
        let mut state = self.inner.state.lock();
        if state.communities.iter().any(|c| c.name == name) {
            return Err(AppError::InvalidArgument(format!(
                "community '{}' already exists",
                name
            )));
        }
        if let Some(parent_id) = parent_id {
            if !state.communities.iter().any(|c| c.id == parent_id) {
                return Err(AppError::NotFound(format!(
                    "parent community {}",
                    parent_id
                )));
            }
        }
        state.next_community_id += 1;
        // Creation times stay strictly increasing, like a database sequence
        let created_at = state
            .communities
            .iter()
            .map(|c| c.created_at + chrono::Duration::microseconds(1))
            .fold(Utc::now(), |now, next| now.max(next));
        let community = Community {
            id: state.next_community_id,
            name: name.to_string(),
            parent_id,
            created_at,
        };
        state.communities.push(community.clone());
        Ok(community)
    }
}

enum PendingWrite {
    Upsert {
        voter: UserId,
        target_id: i64,
        value: i16,
    },
    Delete {
        voter: UserId,
        target_id: i64,
    },
    Adjust {
        target_id: i64,
        delta_total: i64,
        delta_count: i64,
    },
}

/// Vote transaction over the in-memory store.
pub struct MemoryVoteUnitOfWork {
    store: InMemoryStore,
    row_guards: Vec<((UserId, i64), OwnedMutexGuard<()>)>,
    writes: Vec<PendingWrite>,
}

impl Drop for MemoryVoteUnitOfWork {
    /// Releases the row locks and forgets locks nobody else is waiting on.
    fn drop(&mut self) {
        if self.row_guards.is_empty() {
            return;
        }
        let mut locks = self.store.inner.row_locks.lock();
        for (key, guard) in self.row_guards.drain(..) {
            drop(guard);
            if locks
                .get(&key)
                .map_or(false, |lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(&key);
            }
        }
    }
}

#[async_trait]
impl VoteStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn VoteUnitOfWork>> {
        Ok(Box::new(MemoryVoteUnitOfWork {
            store: self.clone(),
            row_guards: Vec::new(),
            writes: Vec::new(),
        }))
    }
}

#[async_trait]
impl VoteUnitOfWork for MemoryVoteUnitOfWork {
    async fn lock_existing(&mut self, voter: &UserId, target_id: i64) -> Result<Option<i16>> {
        let failures = &self.store.inner.injected_lock_failures;
        if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::ConcurrencyConflict(
                "lock wait timed out".to_string(),
            ));
        }

        let guard = self.store.row_lock(voter, target_id).lock_owned().await;
        self.row_guards.push(((voter.clone(), target_id), guard));
        // Widen the window between read and write so contention shows up
        tokio::task::yield_now().await;

        Ok(self.store.vote_value(voter, target_id))
    }

    async fn insert_vote(&mut self, voter: &UserId, target_id: i64, value: i16) -> Result<()> {
        self.writes.push(PendingWrite::Upsert {
            voter: voter.clone(),
            target_id,
            value,
        });
        Ok(())
    }

    async fn update_vote(&mut self, voter: &UserId, target_id: i64, value: i16) -> Result<()> {
        self.writes.push(PendingWrite::Upsert {
            voter: voter.clone(),
            target_id,
            value,
        });
        Ok(())
    }

    async fn delete_vote(&mut self, voter: &UserId, target_id: i64) -> Result<()> {
        self.writes.push(PendingWrite::Delete {
            voter: voter.clone(),
            target_id,
        });
        Ok(())
    }

    async fn adjust_aggregate(
        &mut self,
        target_id: i64,
        delta_total: i64,
        delta_count: i64,
    ) -> Result<()> {
        if self.store.post(target_id).is_none() {
            return Err(AppError::NotFound(format!("post {}", target_id)));
        }
        self.writes.push(PendingWrite::Adjust {
            target_id,
            delta_total,
            delta_count,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut uow = *self;
        let writes = std::mem::take(&mut uow.writes);

        let mut state = uow.store.inner.state.lock();
        for write in writes {
            match write {
                PendingWrite::Upsert {
                    voter,
                    target_id,
                    value,
                } => {
                    state.votes.insert((voter, target_id), value);
                }
                PendingWrite::Delete { voter, target_id } => {
                    state.votes.remove(&(voter, target_id));
                }
                PendingWrite::Adjust {
                    target_id,
                    delta_total,
                    delta_count,
                } => {
                    if let Some(stored) = state.posts.get_mut(&target_id) {
                        stored.post.votes.total += delta_total;
                        stored.post.votes.count += delta_count;
                    }
                }
            }
        }
        drop(state);
        // Row locks are released only after the writes are visible
        drop(uow);
        Ok(())
    }
}
