use crate::model::{
    Id, ModelValidationError, timestamp,
    user::{User, UserMarker},
};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error as _, Unexpected},
};
use thiserror::Error;
use time::UtcDateTime;

pub const POST_TITLE_MAX_LEN: usize = 255;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: User,
    pub title: PostTitle,
    pub body: PostBody,
    #[serde(with = "timestamp")]
    pub created_at: UtcDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct PartialPost {
    pub id: Id<PostMarker>,
    pub author_id: Id<UserMarker>,
    pub title: PostTitle,
    pub body: PostBody,
    #[serde(with = "timestamp")]
    pub created_at: UtcDateTime,
}

/// Validated content of a new post.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct PostContent {
    pub title: PostTitle,
    pub body: PostBody,
}

/// A post as submitted by its author, before validation.
///
/// Missing fields are read as empty strings so that they fail validation
/// the same way blank ones do.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct PostDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl TryFrom<PostDraft> for PostContent {
    type Error = ModelValidationError;

    fn try_from(value: PostDraft) -> Result<Self, Self::Error> {
        Ok(Self {
            title: PostTitle::new(value.title)?,
            body: PostBody::new(value.body)?,
        })
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct PostTitle(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum InvalidPostTitleError {
    #[error("The post title is required")]
    Missing,
    #[error("The post title is longer than {POST_TITLE_MAX_LEN} characters")]
    TooLong(String),
}

impl PostTitle {
    pub fn new(title: String) -> Result<Self, InvalidPostTitleError> {
        if title.trim().is_empty() {
            Err(InvalidPostTitleError::Missing)
        } else if title.chars().count() > POST_TITLE_MAX_LEN {
            Err(InvalidPostTitleError::TooLong(title))
        } else {
            Ok(Self(title))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PostTitle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        PostTitle::new(inner.clone())
            .map_err(|_| D::Error::invalid_value(Unexpected::Str(&inner), &"PostTitle"))
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct PostBody(String);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The post body is required")]
pub struct InvalidPostBodyError;

impl PostBody {
    pub fn new(body: String) -> Result<Self, InvalidPostBodyError> {
        if body.trim().is_empty() {
            Err(InvalidPostBodyError)
        } else {
            Ok(Self(body))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PostBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        PostBody::new(inner.clone())
            .map_err(|_| D::Error::invalid_value(Unexpected::Str(&inner), &"PostBody"))
    }
}
