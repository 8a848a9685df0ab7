use async_trait::async_trait;
use quill_common::model::{
    Id, ModelValidationError,
    auth::{AuthTokenHash, Authentication},
    feed::FeedEntry,
    post::{PartialPost, Post, PostContent, PostMarker},
    read_mark::ReadMark,
    subscription::{Subscription, SubscriptionMarker},
    user::{CreateUser, User, UserHandle, UserMarker},
};
use quill_common::snowflake::SnowflakeTimestampError;
use std::fmt::Debug;
use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("A user with handle or email of {} already exists", .0.get())]
    DuplicateUser(UserHandle),
    #[error("User with id {0} does not exist")]
    UnknownUser(Id<UserMarker>),
    #[error("Post with id {0} does not exist")]
    UnknownPost(Id<PostMarker>),
    #[error("Subscription with id {0} does not exist")]
    UnknownSubscription(Id<SubscriptionMarker>),
    #[error("Could not generate an id: {0}")]
    Snowflake(#[from] SnowflakeTimestampError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Outcome of an insert-if-absent.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum GetOrCreate<T> {
    Existing(T),
    Created(T),
}

impl<T> GetOrCreate<T> {
    #[must_use]
    pub fn was_created(&self) -> bool {
        matches!(self, GetOrCreate::Created(_))
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        match self {
            GetOrCreate::Existing(value) | GetOrCreate::Created(value) => value,
        }
    }
}

/// Persistence for users, posts, subscriptions and read marks.
///
/// Implementations must keep at most one subscription per
/// (subscriber, author) and at most one read mark per (subscription, post),
/// also under concurrent calls, and must delete a subscription's read marks
/// together with it.
#[async_trait]
pub trait BlogStore: Send + Sync + Debug {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>>;

    /// All users, ordered by handle.
    async fn fetch_users(&self) -> Result<Vec<User>>;

    async fn create_user(&self, user: &CreateUser) -> Result<User>;

    async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>>;

    async fn create_auth(&self, authentication: &Authentication) -> Result<()>;

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>>;

    /// Posts of `user_id`, newest first. Empty for unknown users.
    async fn fetch_user_posts(&self, user_id: Id<UserMarker>) -> Result<Vec<PartialPost>>;

    async fn create_post(&self, post: &PostContent, author: Id<UserMarker>) -> Result<Post>;

    async fn fetch_subscription(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<Option<Subscription>>;

    async fn get_or_create_subscription(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<GetOrCreate<Subscription>>;

    /// Removes the edge and its read marks. Returns the number of edges removed.
    async fn delete_subscriptions(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<u64>;

    /// Users subscribed to `author`.
    async fn fetch_subscribers(&self, author: Id<UserMarker>) -> Result<Vec<User>>;

    async fn get_or_create_read_mark(
        &self,
        subscription: Id<SubscriptionMarker>,
        post: Id<PostMarker>,
    ) -> Result<GetOrCreate<ReadMark>>;

    /// Posts of every author `subscriber` follows, newest first, with
    /// `is_read` set when the subscription to the post's author has a read
    /// mark for the post.
    async fn fetch_feed(&self, subscriber: Id<UserMarker>) -> Result<Vec<FeedEntry>>;
}
