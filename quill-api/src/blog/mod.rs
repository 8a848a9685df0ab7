//! Blog operations: authoring, subscriptions, read tracking and the feed.

pub mod notify;

use notify::Notifier;
use quill_common::model::{
    Id, ModelValidationError,
    blog::AuthorBlog,
    feed::FeedEntry,
    notification::Notification,
    post::{Post, PostContent, PostDraft, PostMarker},
    read_mark::ReadMark,
    subscription::Subscription,
    user::{User, UserMarker},
};
use quill_db::store::{BlogStore, DbError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub type Result<T, E = BlogError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BlogError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ModelValidationError),
    #[error("User with id {0} was not found.")]
    UserNotFound(Id<UserMarker>),
    #[error("Post with id {0} was not found.")]
    PostNotFound(Id<PostMarker>),
    #[error("User {0} tried to subscribe to themselves.")]
    SelfSubscription(Id<UserMarker>),
    #[error("User {subscriber} does not follow {author}, the author of post {post}.")]
    NotSubscribed {
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
        post: Id<PostMarker>,
    },
    #[error(transparent)]
    Database(DbError),
}

impl From<DbError> for BlogError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::UnknownUser(user_id) => Self::UserNotFound(user_id),
            DbError::UnknownPost(post_id) => Self::PostNotFound(post_id),
            other => Self::Database(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Blog {
    store: Arc<dyn BlogStore>,
    notifier: Notifier,
}

impl Blog {
    #[must_use]
    pub fn new(store: Arc<dyn BlogStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    #[must_use]
    pub fn store(&self) -> &dyn BlogStore {
        self.store.as_ref()
    }

    pub async fn user(&self, user_id: Id<UserMarker>) -> Result<User> {
        self.store
            .fetch_user(user_id)
            .await?
            .ok_or(BlogError::UserNotFound(user_id))
    }

    pub async fn authors(&self) -> Result<Vec<User>> {
        Ok(self.store.fetch_users().await?)
    }

    pub async fn author_blog(
        &self,
        viewer: Id<UserMarker>,
        author_id: Id<UserMarker>,
    ) -> Result<AuthorBlog> {
        let author = self.user(author_id).await?;
        let posts = self.store.fetch_user_posts(author_id).await?;
        let is_subscribed = self.is_subscribed(viewer, author_id).await?;

        Ok(AuthorBlog {
            author,
            posts,
            is_subscribed,
        })
    }

    pub async fn post(&self, post_id: Id<PostMarker>) -> Result<Post> {
        self.store
            .fetch_post(post_id)
            .await?
            .ok_or(BlogError::PostNotFound(post_id))
    }

    /// Validates and stores a post, then queues one notification per
    /// subscriber of `author`. Notification problems are logged only.
    pub async fn create_post(&self, author: Id<UserMarker>, draft: PostDraft) -> Result<Post> {
        let content = PostContent::try_from(draft)?;
        let post = self.store.create_post(&content, author).await?;
        info!(post = %post.id, %author, "Created post");

        self.notify_subscribers(&post).await;
        Ok(post)
    }

    async fn notify_subscribers(&self, post: &Post) {
        let subscribers = match self.store.fetch_subscribers(post.author.id).await {
            Ok(subscribers) => subscribers,
            Err(err) => {
                warn!(error = %err, post = %post.id, "Could not look up subscribers to notify");
                return;
            }
        };

        let queued = subscribers
            .iter()
            .map(|subscriber| Notification::new_post(subscriber, post))
            .filter(|notification| self.notifier.notify(notification.clone()))
            .count();
        debug!(post = %post.id, queued, "Queued new post notifications");
    }

    /// Follows `author`. Calling this again for the same pair returns the
    /// existing subscription.
    pub async fn subscribe(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<Subscription> {
        if subscriber == author {
            return Err(BlogError::SelfSubscription(subscriber));
        }
        self.user(author).await?;

        let subscription = self
            .store
            .get_or_create_subscription(subscriber, author)
            .await?;
        if subscription.was_created() {
            info!(%subscriber, %author, "Subscribed");
        }

        Ok(subscription.into_inner())
    }

    /// Stops following `author` and forgets what was read through the
    /// subscription. Not following `author` is not an error.
    pub async fn unsubscribe(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<()> {
        let removed = self.store.delete_subscriptions(subscriber, author).await?;
        if removed > 0 {
            info!(%subscriber, %author, "Unsubscribed");
        }
        Ok(())
    }

    pub async fn is_subscribed(
        &self,
        subscriber: Id<UserMarker>,
        author: Id<UserMarker>,
    ) -> Result<bool> {
        Ok(self
            .store
            .fetch_subscription(subscriber, author)
            .await?
            .is_some())
    }

    pub async fn feed(&self, subscriber: Id<UserMarker>) -> Result<Vec<FeedEntry>> {
        Ok(self.store.fetch_feed(subscriber).await?)
    }

    /// Marks `post_id` as read through the subscription to its author.
    /// Marking a post twice returns the first mark.
    pub async fn mark_read(
        &self,
        subscriber: Id<UserMarker>,
        post_id: Id<PostMarker>,
    ) -> Result<ReadMark> {
        let post = self.post(post_id).await?;
        let not_subscribed = BlogError::NotSubscribed {
            subscriber,
            author: post.author.id,
            post: post_id,
        };

        let Some(subscription) = self
            .store
            .fetch_subscription(subscriber, post.author.id)
            .await?
        else {
            return Err(not_subscribed);
        };

        match self
            .store
            .get_or_create_read_mark(subscription.id, post_id)
            .await
        {
            Ok(read_mark) => Ok(read_mark.into_inner()),
            Err(DbError::UnknownSubscription(_)) => Err(not_subscribed),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::blog::{Blog, BlogError, notify::Notifier};
    use quill_common::model::{
        Id, ModelValidationError,
        notification::{NEW_POST_SUBJECT, Notification},
        post::{InvalidPostTitleError, PostDraft},
        user::{CreateUser, User, UserEmail, UserHandle},
    };
    use quill_db::{memory::MemoryStore, store::BlogStore};
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    pub(crate) struct Fixture {
        pub store: Arc<MemoryStore>,
        pub blog: Blog,
        pub notifications: UnboundedReceiver<Notification>,
    }

    impl Fixture {
        pub(crate) fn new() -> Self {
            let store = Arc::new(MemoryStore::default());
            let (notifier, notifications) = Notifier::channel();
            let blog = Blog::new(store.clone(), notifier);

            Self {
                store,
                blog,
                notifications,
            }
        }

        pub(crate) async fn user(&self, handle: &str) -> User {
            self.store
                .create_user(&CreateUser {
                    handle: UserHandle::new(handle.to_owned()).unwrap(),
                    email: UserEmail::new(format!("{handle}@example.com")).unwrap(),
                })
                .await
                .unwrap()
        }

        fn drain_notifications(&mut self) -> Vec<Notification> {
            let mut received = Vec::new();
            while let Ok(notification) = self.notifications.try_recv() {
                received.push(notification);
            }
            received
        }
    }

    pub(crate) fn draft(title: &str, body: &str) -> PostDraft {
        PostDraft {
            title: title.to_owned(),
            body: body.to_owned(),
        }
    }

    fn feed_titles(feed: &[quill_common::model::feed::FeedEntry]) -> Vec<(&str, bool)> {
        feed.iter()
            .map(|entry| (entry.post.title.get(), entry.is_read))
            .collect()
    }

    #[tokio::test]
    async fn follow_read_unfollow() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let bob = fixture.user("bob").await;
        let blog = &fixture.blog;

        blog.subscribe(alice.id, bob.id).await.unwrap();
        let post = blog
            .create_post(bob.id, draft("Hello", "Hi there"))
            .await
            .unwrap();
        assert_eq!(
            feed_titles(&blog.feed(alice.id).await.unwrap()),
            [("Hello", false)]
        );

        blog.mark_read(alice.id, post.id).await.unwrap();
        assert_eq!(
            feed_titles(&blog.feed(alice.id).await.unwrap()),
            [("Hello", true)]
        );

        blog.unsubscribe(alice.id, bob.id).await.unwrap();
        assert!(blog.feed(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribe_twice_keeps_one_subscription() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let bob = fixture.user("bob").await;

        let first = fixture.blog.subscribe(alice.id, bob.id).await.unwrap();
        let second = fixture.blog.subscribe(alice.id, bob.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fixture.store.fetch_subscribers(bob.id).await.unwrap().len(), 1);
        assert!(fixture.blog.is_subscribed(alice.id, bob.id).await.unwrap());
        assert!(!fixture.blog.is_subscribed(bob.id, alice.id).await.unwrap());
    }

    #[tokio::test]
    async fn unsubscribe_without_subscription_is_a_no_op() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let bob = fixture.user("bob").await;

        fixture.blog.unsubscribe(alice.id, bob.id).await.unwrap();
        fixture.blog.unsubscribe(alice.id, Id::from(404)).await.unwrap();
        assert!(!fixture.blog.is_subscribed(alice.id, bob.id).await.unwrap());
    }

    #[tokio::test]
    async fn resubscribing_forgets_read_marks() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let bob = fixture.user("bob").await;
        let blog = &fixture.blog;

        blog.subscribe(alice.id, bob.id).await.unwrap();
        let post = blog.create_post(bob.id, draft("Hello", "body")).await.unwrap();
        blog.mark_read(alice.id, post.id).await.unwrap();

        blog.unsubscribe(alice.id, bob.id).await.unwrap();
        blog.subscribe(alice.id, bob.id).await.unwrap();

        assert_eq!(
            feed_titles(&blog.feed(alice.id).await.unwrap()),
            [("Hello", false)]
        );
    }

    #[tokio::test]
    async fn feed_is_newest_first() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let bob = fixture.user("bob").await;
        let blog = &fixture.blog;

        blog.subscribe(alice.id, bob.id).await.unwrap();
        for title in ["t1", "t2", "t3"] {
            blog.create_post(bob.id, draft(title, "body")).await.unwrap();
        }

        assert_eq!(
            feed_titles(&blog.feed(alice.id).await.unwrap()),
            [("t3", false), ("t2", false), ("t1", false)]
        );
    }

    #[tokio::test]
    async fn read_state_is_per_subscriber() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let carol = fixture.user("carol").await;
        let bob = fixture.user("bob").await;
        let blog = &fixture.blog;

        blog.subscribe(alice.id, bob.id).await.unwrap();
        blog.subscribe(carol.id, bob.id).await.unwrap();
        let post = blog.create_post(bob.id, draft("Hello", "body")).await.unwrap();

        blog.mark_read(alice.id, post.id).await.unwrap();

        assert!(blog.feed(alice.id).await.unwrap()[0].is_read);
        assert!(!blog.feed(carol.id).await.unwrap()[0].is_read);
    }

    #[tokio::test]
    async fn mark_read_twice_returns_the_same_mark() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let bob = fixture.user("bob").await;
        let blog = &fixture.blog;

        blog.subscribe(alice.id, bob.id).await.unwrap();
        let post = blog.create_post(bob.id, draft("Hello", "body")).await.unwrap();

        let first = blog.mark_read(alice.id, post.id).await.unwrap();
        let second = blog.mark_read(alice.id, post.id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn mark_read_requires_a_subscription() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let bob = fixture.user("bob").await;
        let blog = &fixture.blog;

        let post = blog.create_post(bob.id, draft("Hello", "body")).await.unwrap();

        assert!(matches!(
            blog.mark_read(alice.id, post.id).await,
            Err(BlogError::NotSubscribed { author, .. }) if author == bob.id
        ));
        assert!(matches!(
            blog.mark_read(alice.id, Id::from(404)).await,
            Err(BlogError::PostNotFound(_))
        ));
    }

    #[tokio::test]
    async fn self_and_unknown_subscriptions_are_rejected() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;

        assert!(matches!(
            fixture.blog.subscribe(alice.id, alice.id).await,
            Err(BlogError::SelfSubscription(_))
        ));
        assert!(matches!(
            fixture.blog.subscribe(alice.id, Id::from(404)).await,
            Err(BlogError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn new_post_notifies_each_subscriber() {
        let mut fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let carol = fixture.user("carol").await;
        let bob = fixture.user("bob").await;

        fixture.blog.subscribe(alice.id, bob.id).await.unwrap();
        fixture.blog.subscribe(carol.id, bob.id).await.unwrap();
        let post = fixture
            .blog
            .create_post(bob.id, draft("Hello", "body"))
            .await
            .unwrap();

        let notifications = fixture.drain_notifications();
        let recipients: Vec<&str> = notifications
            .iter()
            .map(|notification| notification.to.get())
            .collect();
        assert_eq!(recipients, ["alice@example.com", "carol@example.com"]);
        for notification in &notifications {
            assert_eq!(notification.post, post.id);
            assert_eq!(notification.subject, NEW_POST_SUBJECT);
            assert_eq!(notification.message, "Created new post Hello");
        }
    }

    #[tokio::test]
    async fn invalid_post_is_not_stored_or_announced() {
        let mut fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let bob = fixture.user("bob").await;
        fixture.blog.subscribe(alice.id, bob.id).await.unwrap();

        let result = fixture.blog.create_post(bob.id, draft("", "body")).await;

        assert!(matches!(
            result,
            Err(BlogError::Validation(ModelValidationError::PostTitle(
                InvalidPostTitleError::Missing
            )))
        ));
        assert!(fixture.blog.store().fetch_user_posts(bob.id).await.unwrap().is_empty());
        assert!(fixture.drain_notifications().is_empty());
    }

    #[tokio::test]
    async fn post_survives_a_stopped_dispatcher() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let bob = fixture.user("bob").await;
        fixture.blog.subscribe(alice.id, bob.id).await.unwrap();

        let Fixture {
            blog,
            notifications,
            ..
        } = fixture;
        drop(notifications);

        let post = blog.create_post(bob.id, draft("Hello", "body")).await.unwrap();
        assert_eq!(blog.post(post.id).await.unwrap(), post);
    }

    #[tokio::test]
    async fn author_blog_reports_subscription() {
        let fixture = Fixture::new();
        let alice = fixture.user("alice").await;
        let bob = fixture.user("bob").await;
        let blog = &fixture.blog;

        blog.create_post(bob.id, draft("Hello", "body")).await.unwrap();

        let operations = fixture.store.operation_count();
        let before = blog.author_blog(alice.id, bob.id).await.unwrap();
        // author, posts and subscription, one lookup each
        assert_eq!(fixture.store.operation_count() - operations, 3);
        assert!(!before.is_subscribed);
        assert_eq!(before.posts.len(), 1);
        assert_eq!(before.author, bob);

        blog.subscribe(alice.id, bob.id).await.unwrap();
        assert!(blog.author_blog(alice.id, bob.id).await.unwrap().is_subscribed);

        assert!(matches!(
            blog.author_blog(alice.id, Id::from(404)).await,
            Err(BlogError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn authors_are_listed_by_handle() {
        let fixture = Fixture::new();
        fixture.user("carol").await;
        fixture.user("alice").await;

        let handles: Vec<String> = fixture
            .blog
            .authors()
            .await
            .unwrap()
            .into_iter()
            .map(|user| user.handle.get().to_owned())
            .collect();
        assert_eq!(handles, ["alice", "carol"]);
    }
}
