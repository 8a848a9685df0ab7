//! A process-local [`BlogStore`].
//!
//! Every operation runs under one lock, so insert-if-absent and cascading
//! deletes are atomic.

use crate::store::{BlogStore, DbError, GetOrCreate, Result};
use async_trait::async_trait;
use quill_common::model::{
    Id, QuillSnowflakeGenerator,
    auth::{AuthTokenHash, Authentication},
    feed::FeedEntry,
    post::{PartialPost, Post, PostContent, PostMarker},
    read_mark::{ReadMark, ReadMarkMarker},
    subscription::{Subscription, SubscriptionMarker},
    user::{CreateUser, User, UserMarker},
};
use quill_common::snowflake::{ProcessId, WorkerId};
use std::{
    cmp::Reverse,
    collections::BTreeMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use time::UtcDateTime;

#[derive(Debug)]
struct Tables {
    snowflake_generator: QuillSnowflakeGenerator,
    users: BTreeMap<Id<UserMarker>, User>,
    authentications: Vec<Authentication>,
    posts: BTreeMap<Id<PostMarker>, PartialPost>,
    subscriptions: BTreeMap<Id<SubscriptionMarker>, Subscription>,
    read_marks: BTreeMap<Id<ReadMarkMarker>, ReadMark>,
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    operations: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            tables: Mutex::new(Tables {
                snowflake_generator: QuillSnowflakeGenerator::new(worker_id, process_id),
                users: BTreeMap::new(),
                authentications: Vec::new(),
                posts: BTreeMap::new(),
                subscriptions: BTreeMap::new(),
                read_marks: BTreeMap::new(),
            }),
            operations: AtomicU64::new(0),
        }
    }

    /// Number of store operations executed so far.
    #[must_use]
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(WorkerId::default(), ProcessId::default())
    }
}

impl Tables {
    fn next_id<Marker>(&mut self, time: UtcDateTime) -> Result<Id<Marker>> {
        Ok(Id::new(self.snowflake_generator.generate_at(time)?))
    }

    fn user(&self, user_id: Id<UserMarker>) -> Result<&User> {
        self.users.get(&user_id).ok_or(DbError::UnknownUser(user_id))
    }

    fn full_post(&self, post: &PartialPost) -> Result<Post> {
        Ok(Post {
            id: post.id,
            author: self.user(post.author_id)?.clone(),
            title: post.title.clone(),
            body: post.body.clone(),
            created_at: post.created_at,
        })
    }

    fn subscription(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Option<&Subscription> {
        self.subscriptions
            .values()
            .find(|subscription| subscription.subscriber == subscriber && subscription.author == author)
    }

    fn is_read(&self, subscription: Id<SubscriptionMarker>, post: Id<PostMarker>) -> bool {
        self.read_marks
            .values()
            .any(|mark| mark.subscription == subscription && mark.post == post)
    }
}

fn newest_first(posts: &mut [PartialPost]) {
    posts.sort_by_key(|post| Reverse((post.created_at, post.id)));
}

#[async_trait]
impl BlogStore for MemoryStore {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn fetch_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.lock().users.values().cloned().collect();
        users.sort_by(|a, b| a.handle.cmp(&b.handle));
        Ok(users)
    }

    async fn create_user(&self, user: &CreateUser) -> Result<User> {
        let mut tables = self.lock();

        if tables
            .users
            .values()
            .any(|existing| existing.handle == user.handle || existing.email == user.email)
        {
            return Err(DbError::DuplicateUser(user.handle.clone()));
        }

        let user = User {
            id: tables.next_id(UtcDateTime::now())?,
            handle: user.handle.clone(),
            email: user.email.clone(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>> {
        let tables = self.lock();
        let authentication = tables
            .authentications
            .iter()
            .find(|authentication| authentication.token_hash == *token_hash)
            .cloned();
        Ok(authentication)
    }

    async fn create_auth(&self, authentication: &Authentication) -> Result<()> {
        let mut tables = self.lock();
        tables.user(authentication.user)?;
        tables.authentications.push(authentication.clone());
        Ok(())
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let tables = self.lock();
        tables
            .posts
            .get(&post_id)
            .map(|post| tables.full_post(post))
            .transpose()
    }

    async fn fetch_user_posts(&self, user_id: Id<UserMarker>) -> Result<Vec<PartialPost>> {
        let tables = self.lock();
        let mut posts: Vec<PartialPost> = tables
            .posts
            .values()
            .filter(|post| post.author_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut posts);
        Ok(posts)
    }

    async fn create_post(&self, post: &PostContent, author: Id<UserMarker>) -> Result<Post> {
        let mut tables = self.lock();
        tables.user(author)?;

        let created_at = UtcDateTime::now();
        let post = PartialPost {
            id: tables.next_id(created_at)?,
            author_id: author,
            title: post.title.clone(),
            body: post.body.clone(),
            created_at,
        };
        tables.posts.insert(post.id, post.clone());
        tables.full_post(&post)
    }

    async fn fetch_subscription(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<Option<Subscription>> {
        Ok(self.lock().subscription(subscriber, author).copied())
    }

    async fn get_or_create_subscription(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<GetOrCreate<Subscription>> {
        let mut tables = self.lock();
        tables.user(subscriber)?;
        tables.user(author)?;

        if let Some(existing) = tables.subscription(subscriber, author) {
            return Ok(GetOrCreate::Existing(*existing));
        }

        let subscription = Subscription {
            id: tables.next_id(UtcDateTime::now())?,
            subscriber,
            author,
        };
        tables.subscriptions.insert(subscription.id, subscription);
        Ok(GetOrCreate::Created(subscription))
    }

    async fn delete_subscriptions(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<u64> {
        let mut tables = self.lock();

        let before = tables.subscriptions.len();
        tables.subscriptions.retain(|_, subscription| {
            !(subscription.subscriber == subscriber && subscription.author == author)
        });
        let removed = before - tables.subscriptions.len();

        let Tables {
            subscriptions,
            read_marks,
            ..
        } = &mut *tables;
        read_marks.retain(|_, mark| subscriptions.contains_key(&mark.subscription));

        Ok(removed as u64)
    }

    async fn fetch_subscribers(&self, author: Id<UserMarker>) -> Result<Vec<User>> {
        let tables = self.lock();
        let mut subscribers = tables
            .subscriptions
            .values()
            .filter(|subscription| subscription.author == author)
            .map(|subscription| tables.user(subscription.subscriber).cloned())
            .collect::<Result<Vec<_>>>()?;
        subscribers.sort_by(|a, b| a.handle.cmp(&b.handle));
        Ok(subscribers)
    }

    async fn get_or_create_read_mark(
        &self,
        subscription: Id<SubscriptionMarker>,
        post: Id<PostMarker>,
    ) -> Result<GetOrCreate<ReadMark>> {
        let mut tables = self.lock();

        if !tables.subscriptions.contains_key(&subscription) {
            return Err(DbError::UnknownSubscription(subscription));
        }
        if !tables.posts.contains_key(&post) {
            return Err(DbError::UnknownPost(post));
        }

        if let Some(existing) = tables
            .read_marks
            .values()
            .find(|mark| mark.subscription == subscription && mark.post == post)
        {
            return Ok(GetOrCreate::Existing(*existing));
        }

        let read_mark = ReadMark {
            id: tables.next_id(UtcDateTime::now())?,
            subscription,
            post,
        };
        tables.read_marks.insert(read_mark.id, read_mark);
        Ok(GetOrCreate::Created(read_mark))
    }

    async fn fetch_feed(&self, subscriber: Id<UserMarker>) -> Result<Vec<FeedEntry>> {
        let tables = self.lock();

        let followed: BTreeMap<Id<UserMarker>, Id<SubscriptionMarker>> = tables
            .subscriptions
            .values()
            .filter(|subscription| subscription.subscriber == subscriber)
            .map(|subscription| (subscription.author, subscription.id))
            .collect();

        let mut posts: Vec<PartialPost> = tables
            .posts
            .values()
            .filter(|post| followed.contains_key(&post.author_id))
            .cloned()
            .collect();
        newest_first(&mut posts);

        posts
            .iter()
            .map(|post| -> Result<FeedEntry> {
                let subscription = followed[&post.author_id];
                Ok(FeedEntry {
                    post: tables.full_post(post)?,
                    is_read: tables.is_read(subscription, post.id),
                })
            })
            .collect()
    }
}
