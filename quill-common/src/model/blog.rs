use crate::model::{post::PartialPost, user::User};
use serde::{Deserialize, Serialize};

/// An author's posts, newest first, as seen by a particular viewer.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct AuthorBlog {
    pub author: User,
    pub posts: Vec<PartialPost>,
    pub is_subscribed: bool,
}
