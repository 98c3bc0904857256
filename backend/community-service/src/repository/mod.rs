pub mod comments;
pub mod posts;

pub use comments::CommentRepository;
pub use posts::PostRepository;

use crate::error::{ServiceError, ServiceResult};
use crate::store::{CollectionPath, StoreError};

const COMMUNITIES: &str = "Community";
const POSTS: &str = "Post";
const COMMENTS: &str = "Comment";
const BOOKMARKS: &str = "Bookmark";
const SUBSCRIPTIONS: &str = "Subscription";

/// `Community/{community_id}/Post`
pub fn posts_collection(community_id: &str) -> CollectionPath {
    CollectionPath::root(COMMUNITIES)
        .doc(community_id)
        .collection(POSTS)
}

/// `Community/{community_id}/Post/{post_id}/Comment`
pub fn comments_collection(community_id: &str, post_id: &str) -> CollectionPath {
    posts_collection(community_id)
        .doc(post_id)
        .collection(COMMENTS)
}

pub fn bookmarks_collection() -> CollectionPath {
    CollectionPath::root(BOOKMARKS)
}

pub fn subscriptions_collection() -> CollectionPath {
    CollectionPath::root(SUBSCRIPTIONS)
}

/// Reject empty identifiers before any remote call
fn require<'a>(value: &'a str, what: &str) -> ServiceResult<&'a str> {
    if value.trim().is_empty() || value.contains('/') {
        return Err(ServiceError::InvalidInput(format!("{} is required", what)));
    }
    Ok(value)
}

/// Log a failed store call and lift it into the service error
fn store_failure(operation: &'static str) -> impl FnOnce(StoreError) -> ServiceError {
    move |err| {
        tracing::warn!(operation, error = %err, "store call failed");
        ServiceError::Store(err)
    }
}
