use crate::model::{Id, user::UserMarker};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct SubscriptionMarker;

/// Directed edge: `subscriber` follows `author`.
///
/// At most one exists per (subscriber, author) pair.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct Subscription {
    pub id: Id<SubscriptionMarker>,
    pub subscriber: Id<UserMarker>,
    pub author: Id<UserMarker>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct SubscriptionStatus {
    pub author: Id<UserMarker>,
    pub subscribed: bool,
}
