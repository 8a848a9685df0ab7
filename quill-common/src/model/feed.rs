use crate::model::post::Post;
use serde::{Deserialize, Serialize};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct FeedEntry {
    pub post: Post,
    pub is_read: bool,
}
