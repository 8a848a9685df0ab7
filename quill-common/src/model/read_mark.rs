use crate::model::{Id, post::PostMarker, subscription::SubscriptionMarker};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct ReadMarkMarker;

/// Records that a post was read through a subscription.
///
/// At most one exists per (subscription, post) pair. Marks are removed
/// together with their subscription.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct ReadMark {
    pub id: Id<ReadMarkMarker>,
    pub subscription: Id<SubscriptionMarker>,
    pub post: Id<PostMarker>,
}
