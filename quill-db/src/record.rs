use quill_common::model::{
    Id, ModelValidationError,
    auth::{Authentication, TokenLifetime},
    feed::FeedEntry,
    post::{PartialPost, Post, PostBody, PostTitle},
    read_mark::ReadMark,
    subscription::Subscription,
    user::{User, UserEmail, UserHandle},
};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_snowflake: i64,
    pub handle: String,
    pub email: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FullPostRecord {
    pub post_snowflake: i64,
    pub title: String,
    pub body: String,
    pub created_at: OffsetDateTime,
    #[sqlx(flatten)]
    pub author: UserRecord,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PartialPostRecord {
    pub post_snowflake: i64,
    pub user_snowflake: i64,
    pub title: String,
    pub body: String,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FeedRecord {
    #[sqlx(flatten)]
    pub post: FullPostRecord,
    pub is_read: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct SubscriptionRecord {
    pub subscription_snowflake: i64,
    pub subscriber_snowflake: i64,
    pub author_snowflake: i64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct ReadMarkRecord {
    pub read_mark_snowflake: i64,
    pub subscription_snowflake: i64,
    pub post_snowflake: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_snowflake: i64,
    pub token_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_after_seconds: Option<i64>,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.user_snowflake),
            handle: UserHandle::new(value.handle)?,
            email: UserEmail::new(value.email)?,
        })
    }
}

impl TryFrom<FullPostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: FullPostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            author: value.author.try_into()?,
            title: PostTitle::new(value.title)?,
            body: PostBody::new(value.body)?,
            created_at: value.created_at.to_utc(),
        })
    }
}

impl TryFrom<PartialPostRecord> for PartialPost {
    type Error = ModelValidationError;

    fn try_from(value: PartialPostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            author_id: Id::from_db(value.user_snowflake),
            title: PostTitle::new(value.title)?,
            body: PostBody::new(value.body)?,
            created_at: value.created_at.to_utc(),
        })
    }
}

impl TryFrom<FeedRecord> for FeedEntry {
    type Error = ModelValidationError;

    fn try_from(value: FeedRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            post: value.post.try_into()?,
            is_read: value.is_read,
        })
    }
}

impl From<SubscriptionRecord> for Subscription {
    fn from(value: SubscriptionRecord) -> Self {
        Self {
            id: Id::from_db(value.subscription_snowflake),
            subscriber: Id::from_db(value.subscriber_snowflake),
            author: Id::from_db(value.author_snowflake),
        }
    }
}

impl From<ReadMarkRecord> for ReadMark {
    fn from(value: ReadMarkRecord) -> Self {
        Self {
            id: Id::from_db(value.read_mark_snowflake),
            subscription: Id::from_db(value.subscription_snowflake),
            post: Id::from_db(value.post_snowflake),
        }
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: Id::from_db(value.user_snowflake),
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at.to_utc(),
            lifetime: value
                .expires_after_seconds
                .map(|seconds| TokenLifetime::try_from(Duration::seconds(seconds)))
                .transpose()?,
        })
    }
}
