use crate::model::{
    Id,
    post::{Post, PostMarker},
    user::{User, UserEmail, UserMarker},
};
use serde::{Deserialize, Serialize};

pub const NEW_POST_SUBJECT: &str = "New post";

/// A message telling a subscriber about a new post.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Notification {
    pub recipient: Id<UserMarker>,
    pub to: UserEmail,
    pub post: Id<PostMarker>,
    pub subject: String,
    pub message: String,
}

impl Notification {
    #[must_use]
    pub fn new_post(subscriber: &User, post: &Post) -> Self {
        Self {
            recipient: subscriber.id,
            to: subscriber.email.clone(),
            post: post.id,
            subject: NEW_POST_SUBJECT.to_owned(),
            message: format!("Created new post {}", post.title.get()),
        }
    }
}
