use crate::{
    record::{
        AuthenticationRecord, FeedRecord, FullPostRecord, PartialPostRecord, ReadMarkRecord,
        SubscriptionRecord, UserRecord,
    },
    store::{BlogStore, DbError, GetOrCreate, Result},
};
use async_trait::async_trait;
use quill_common::model::{
    Id, QuillSnowflake, QuillSnowflakeGenerator,
    auth::{AuthTokenHash, Authentication},
    feed::FeedEntry,
    post::{PartialPost, Post, PostContent, PostMarker},
    read_mark::{ReadMark, ReadMarkMarker},
    subscription::{Subscription, SubscriptionMarker},
    user::{CreateUser, User, UserMarker},
};
use quill_common::snowflake::{ProcessId, WorkerId};
use sqlx::{PgPool, postgres::PgPoolOptions, query, query_as};
use std::sync::{Mutex, PoisonError};
use time::{OffsetDateTime, UtcDateTime};
use tracing::{debug, info};

const SUBSCRIBER_FOREIGN_KEY: &str = "subscriptions_subscriber_snowflake_fkey";
const READ_MARK_POST_FOREIGN_KEY: &str = "read_marks_post_snowflake_fkey";

const FULL_POST_COLUMNS: &str = "
    posts.post_snowflake,
    posts.title,
    posts.body,
    posts.created_at,
    users.user_snowflake,
    users.handle,
    users.email
";

#[derive(Debug)]
pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<QuillSnowflakeGenerator>,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId, process_id: ProcessId) -> Self {
        let snowflake_generator = Mutex::new(QuillSnowflakeGenerator::new(worker_id, process_id));

        Self {
            pool,
            snowflake_generator,
        }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        worker_id: WorkerId,
        process_id: ProcessId,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        debug!(max_connections, "Connected to database");

        Ok(Self::new(pool, worker_id, process_id))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    fn generate_snowflake(&self, time: UtcDateTime) -> Result<QuillSnowflake> {
        let mut generator = self
            .snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(generator.generate_at(time)?)
    }
}

#[async_trait]
impl BlogStore for DbClient {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.handle,
                users.email
            FROM
                users.users
            WHERE
                users.user_snowflake = $1
            ",
        )
        .bind(user_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn fetch_users(&self) -> Result<Vec<User>> {
        let records = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.handle,
                users.email
            FROM
                users.users
            ORDER BY
                users.handle
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<Result<_, _>>()?;
        Ok(users)
    }

    async fn create_user(&self, user: &CreateUser) -> Result<User> {
        let user_snowflake = self.generate_snowflake(UtcDateTime::now())?;

        let record = query_as::<_, UserRecord>(
            "
            INSERT INTO users.users (user_snowflake, handle, email)
            VALUES ($1, $2, $3)
            RETURNING user_snowflake, handle, email
            ",
        )
        .bind(Id::<UserMarker>::new(user_snowflake).to_db())
        .bind(user.handle.get())
        .bind(user.email.get())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::DuplicateUser(user.handle.clone())
            }
            other => other.into(),
        })?;

        Ok(record.try_into()?)
    }

    async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>> {
        let record = query_as::<_, AuthenticationRecord>(
            "
            SELECT
                user_snowflake,
                token_hash,
                created_at,
                expires_after_seconds
            FROM
                users.authentications
            WHERE
                token_hash = $1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let authentication = record.map(Authentication::try_from).transpose()?;
        Ok(authentication)
    }

    async fn create_auth(&self, authentication: &Authentication) -> Result<()> {
        query(
            "
            INSERT INTO users.authentications
                (token_hash, user_snowflake, created_at, expires_after_seconds)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&authentication.token_hash.0[..])
        .bind(authentication.user.to_db())
        .bind(OffsetDateTime::from(authentication.created_at))
        .bind(
            authentication
                .lifetime
                .map(|lifetime| lifetime.get().whole_seconds()),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, FullPostRecord>(&format!(
            "
            SELECT {FULL_POST_COLUMNS}
            FROM
                posts.posts
                JOIN users.users ON users.user_snowflake = posts.user_snowflake
            WHERE
                posts.post_snowflake = $1
            "
        ))
        .bind(post_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    async fn fetch_user_posts(&self, user_id: Id<UserMarker>) -> Result<Vec<PartialPost>> {
        let records = query_as::<_, PartialPostRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.user_snowflake,
                posts.title,
                posts.body,
                posts.created_at
            FROM
                posts.posts
            WHERE
                posts.user_snowflake = $1
            ORDER BY
                posts.created_at DESC,
                posts.post_snowflake DESC
            ",
        )
        .bind(user_id.to_db())
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(PartialPost::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    async fn create_post(&self, post: &PostContent, author: Id<UserMarker>) -> Result<Post> {
        let created_at = UtcDateTime::now();
        let post_id = Id::<PostMarker>::new(self.generate_snowflake(created_at)?);

        // Read back through RETURNING, TIMESTAMPTZ keeps microseconds only.
        let record = query_as::<_, FullPostRecord>(&format!(
            "
            WITH inserted AS (
                INSERT INTO posts.posts (post_snowflake, user_snowflake, title, body, created_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING post_snowflake, user_snowflake, title, body, created_at
            )
            SELECT {FULL_POST_COLUMNS}
            FROM
                inserted AS posts
                JOIN users.users ON users.user_snowflake = posts.user_snowflake
            "
        ))
        .bind(post_id.to_db())
        .bind(author.to_db())
        .bind(post.title.get())
        .bind(post.body.get())
        .bind(OffsetDateTime::from(created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                DbError::UnknownUser(author)
            }
            other => other.into(),
        })?;

        Ok(record.try_into()?)
    }

    async fn fetch_subscription(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<Option<Subscription>> {
        let record = query_as::<_, SubscriptionRecord>(
            "
            SELECT
                subscription_snowflake,
                subscriber_snowflake,
                author_snowflake
            FROM
                subscriptions.subscriptions
            WHERE
                subscriber_snowflake = $1 AND author_snowflake = $2
            ",
        )
        .bind(subscriber.to_db())
        .bind(author.to_db())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Subscription::from))
    }

    async fn get_or_create_subscription(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<GetOrCreate<Subscription>> {
        // A concurrent unsubscribe can delete the conflicting row before it is
        // read, in which case the insert is tried again.
        loop {
            let subscription_id =
                Id::<SubscriptionMarker>::new(self.generate_snowflake(UtcDateTime::now())?);

            let inserted = query_as::<_, SubscriptionRecord>(
                "
                INSERT INTO subscriptions.subscriptions
                    (subscription_snowflake, subscriber_snowflake, author_snowflake)
                VALUES ($1, $2, $3)
                ON CONFLICT (subscriber_snowflake, author_snowflake) DO NOTHING
                RETURNING subscription_snowflake, subscriber_snowflake, author_snowflake
                ",
            )
            .bind(subscription_id.to_db())
            .bind(subscriber.to_db())
            .bind(author.to_db())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                    let unknown = if db_err.constraint() == Some(SUBSCRIBER_FOREIGN_KEY) {
                        subscriber
                    } else {
                        author
                    };
                    DbError::UnknownUser(unknown)
                }
                other => other.into(),
            })?;

            if let Some(record) = inserted {
                return Ok(GetOrCreate::Created(record.into()));
            }

            if let Some(existing) = self.fetch_subscription(subscriber, author).await? {
                return Ok(GetOrCreate::Existing(existing));
            }
            debug!(%subscriber, %author, "Subscription vanished after conflict, retrying");
        }
    }

    async fn delete_subscriptions(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<u64> {
        let result = query(
            "
            DELETE FROM subscriptions.subscriptions
            WHERE subscriber_snowflake = $1 AND author_snowflake = $2
            ",
        )
        .bind(subscriber.to_db())
        .bind(author.to_db())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn fetch_subscribers(&self, author: Id<UserMarker>) -> Result<Vec<User>> {
        let records = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.handle,
                users.email
            FROM
                subscriptions.subscriptions
                JOIN users.users ON users.user_snowflake = subscriptions.subscriber_snowflake
            WHERE
                subscriptions.author_snowflake = $1
            ORDER BY
                users.handle
            ",
        )
        .bind(author.to_db())
        .fetch_all(&self.pool)
        .await?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<Result<_, _>>()?;
        Ok(users)
    }

    async fn get_or_create_read_mark(
        &self,
        subscription: Id<SubscriptionMarker>,
        post: Id<PostMarker>,
    ) -> Result<GetOrCreate<ReadMark>> {
        // The subscription may be deleted between the insert and the select.
        // The retried insert then fails its foreign key.
        loop {
            let read_mark_id =
                Id::<ReadMarkMarker>::new(self.generate_snowflake(UtcDateTime::now())?);

            let inserted = query_as::<_, ReadMarkRecord>(
                "
                INSERT INTO subscriptions.read_marks
                    (read_mark_snowflake, subscription_snowflake, post_snowflake)
                VALUES ($1, $2, $3)
                ON CONFLICT (subscription_snowflake, post_snowflake) DO NOTHING
                RETURNING read_mark_snowflake, subscription_snowflake, post_snowflake
                ",
            )
            .bind(read_mark_id.to_db())
            .bind(subscription.to_db())
            .bind(post.to_db())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                    if db_err.constraint() == Some(READ_MARK_POST_FOREIGN_KEY) {
                        DbError::UnknownPost(post)
                    } else {
                        DbError::UnknownSubscription(subscription)
                    }
                }
                other => other.into(),
            })?;

            if let Some(record) = inserted {
                return Ok(GetOrCreate::Created(record.into()));
            }

            let existing = query_as::<_, ReadMarkRecord>(
                "
                SELECT
                    read_mark_snowflake,
                    subscription_snowflake,
                    post_snowflake
                FROM
                    subscriptions.read_marks
                WHERE
                    subscription_snowflake = $1 AND post_snowflake = $2
                ",
            )
            .bind(subscription.to_db())
            .bind(post.to_db())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(record) = existing {
                return Ok(GetOrCreate::Existing(record.into()));
            }
        }
    }

    async fn fetch_feed(&self, subscriber: Id<UserMarker>) -> Result<Vec<FeedEntry>> {
        let records = query_as::<_, FeedRecord>(&format!(
            "
            SELECT
                {FULL_POST_COLUMNS},
                EXISTS (
                    SELECT 1
                    FROM subscriptions.read_marks
                    WHERE
                        read_marks.subscription_snowflake = subscriptions.subscription_snowflake
                        AND read_marks.post_snowflake = posts.post_snowflake
                ) AS is_read
            FROM
                subscriptions.subscriptions
                JOIN posts.posts ON posts.user_snowflake = subscriptions.author_snowflake
                JOIN users.users ON users.user_snowflake = posts.user_snowflake
            WHERE
                subscriptions.subscriber_snowflake = $1
            ORDER BY
                posts.created_at DESC,
                posts.post_snowflake DESC
            "
        ))
        .bind(subscriber.to_db())
        .fetch_all(&self.pool)
        .await?;

        let feed = records
            .into_iter()
            .map(FeedEntry::try_from)
            .collect::<Result<_, _>>()?;
        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        client::DbClient,
        store::{BlogStore, DbError},
    };
    use quill_common::model::{
        Id,
        post::{PostBody, PostContent, PostTitle},
        user::{CreateUser, User, UserEmail, UserHandle},
    };
    use quill_common::snowflake::{ProcessId, WorkerId};
    use sqlx::PgPool;

    fn client(pool: PgPool) -> DbClient {
        DbClient::new(pool, WorkerId::default(), ProcessId::default())
    }

    async fn user(client: &DbClient, handle: &str) -> User {
        client
            .create_user(&CreateUser {
                handle: UserHandle::new(handle.to_owned()).unwrap(),
                email: UserEmail::new(format!("{handle}@example.com")).unwrap(),
            })
            .await
            .unwrap()
    }

    fn content(title: &str) -> PostContent {
        PostContent {
            title: PostTitle::new(title.to_owned()).unwrap(),
            body: PostBody::new(format!("{title} body")).unwrap(),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn created_post_matches_stored_post(pool: PgPool) {
        let client = client(pool);
        let bob = user(&client, "bob").await;

        let created = client.create_post(&content("Hello"), bob.id).await.unwrap();
        let fetched = client.fetch_post(created.id).await.unwrap().unwrap();

        assert_eq!(created, fetched);
        assert_eq!(created.author, bob);
        assert_eq!(
            client.fetch_user_posts(bob.id).await.unwrap()[0].created_at,
            created.created_at
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn post_by_unknown_author_is_rejected(pool: PgPool) {
        let client = client(pool);
        let ghost = Id::from(404);

        assert!(matches!(
            client.create_post(&content("Hello"), ghost).await,
            Err(DbError::UnknownUser(id)) if id == ghost
        ));
        assert!(client.fetch_user_posts(ghost).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn subscription_is_created_once(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;

        let first = client.get_or_create_subscription(alice.id, bob.id).await.unwrap();
        let second = client.get_or_create_subscription(alice.id, bob.id).await.unwrap();

        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(first.into_inner(), second.into_inner());
        assert_eq!(client.fetch_subscribers(bob.id).await.unwrap(), vec![alice]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn subscription_to_unknown_user_is_rejected(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let ghost = Id::from(404);

        assert!(matches!(
            client.get_or_create_subscription(alice.id, ghost).await,
            Err(DbError::UnknownUser(id)) if id == ghost
        ));
        assert!(matches!(
            client.get_or_create_subscription(ghost, alice.id).await,
            Err(DbError::UnknownUser(id)) if id == ghost
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn read_mark_is_created_once(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;
        let post = client.create_post(&content("Hello"), bob.id).await.unwrap();
        let subscription = client
            .get_or_create_subscription(alice.id, bob.id)
            .await
            .unwrap()
            .into_inner();

        let first = client
            .get_or_create_read_mark(subscription.id, post.id)
            .await
            .unwrap();
        let second = client
            .get_or_create_read_mark(subscription.id, post.id)
            .await
            .unwrap();

        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(first.into_inner(), second.into_inner());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn read_mark_needs_subscription_and_post(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;
        let post = client.create_post(&content("Hello"), bob.id).await.unwrap();
        let subscription = client
            .get_or_create_subscription(alice.id, bob.id)
            .await
            .unwrap()
            .into_inner();

        assert!(matches!(
            client.get_or_create_read_mark(subscription.id, Id::from(404)).await,
            Err(DbError::UnknownPost(_))
        ));

        client.delete_subscriptions(alice.id, bob.id).await.unwrap();
        assert!(matches!(
            client.get_or_create_read_mark(subscription.id, post.id).await,
            Err(DbError::UnknownSubscription(id)) if id == subscription.id
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unsubscribe_cascades_read_marks(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;
        let post = client.create_post(&content("Hello"), bob.id).await.unwrap();

        let subscription = client
            .get_or_create_subscription(alice.id, bob.id)
            .await
            .unwrap()
            .into_inner();
        client
            .get_or_create_read_mark(subscription.id, post.id)
            .await
            .unwrap();
        assert!(client.fetch_feed(alice.id).await.unwrap()[0].is_read);

        assert_eq!(client.delete_subscriptions(alice.id, bob.id).await.unwrap(), 1);
        assert_eq!(client.delete_subscriptions(alice.id, bob.id).await.unwrap(), 0);
        assert!(client.fetch_feed(alice.id).await.unwrap().is_empty());

        client.get_or_create_subscription(alice.id, bob.id).await.unwrap();
        let feed = client.fetch_feed(alice.id).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert!(!feed[0].is_read);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn feed_is_newest_first_and_limited_to_followed_authors(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;
        let carol = user(&client, "carol").await;

        client.get_or_create_subscription(alice.id, bob.id).await.unwrap();
        for title in ["first", "second", "third"] {
            client.create_post(&content(title), bob.id).await.unwrap();
        }
        client.create_post(&content("unfollowed"), carol.id).await.unwrap();

        let titles: Vec<String> = client
            .fetch_feed(alice.id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.post.title.get().to_owned())
            .collect();
        assert_eq!(titles, ["third", "second", "first"]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn read_state_is_per_subscriber(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let carol = user(&client, "carol").await;
        let bob = user(&client, "bob").await;
        let post = client.create_post(&content("Hello"), bob.id).await.unwrap();

        let alice_subscription = client
            .get_or_create_subscription(alice.id, bob.id)
            .await
            .unwrap()
            .into_inner();
        client.get_or_create_subscription(carol.id, bob.id).await.unwrap();
        client
            .get_or_create_read_mark(alice_subscription.id, post.id)
            .await
            .unwrap();

        assert!(client.fetch_feed(alice.id).await.unwrap()[0].is_read);
        assert!(!client.fetch_feed(carol.id).await.unwrap()[0].is_read);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn duplicate_handles_are_rejected(pool: PgPool) {
        let client = client(pool);
        user(&client, "alice").await;

        let duplicate = client
            .create_user(&CreateUser {
                handle: UserHandle::new("alice".to_owned()).unwrap(),
                email: UserEmail::new("other@example.com".to_owned()).unwrap(),
            })
            .await;
        assert!(matches!(duplicate, Err(DbError::DuplicateUser(_))));
    }
}
