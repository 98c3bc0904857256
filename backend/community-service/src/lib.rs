//! Community Service
//!
//! Data-access layer of the community forum: posts, comments, bookmarks and
//! subscriptions stored in a remote document database.
//!
//! Document layout:
//!
//! ```text
//! Community/{communityID}/Post/{postID}
//! Community/{communityID}/Post/{postID}/Comment/{commentID}
//! Bookmark/{bookmarkID}
//! Subscription/{subscriptionID}
//! ```
//!
//! # Example
//!
//! ```no_run
//! use community_service::config::Config;
//! use community_service::domain::PostQuery;
//! use community_service::{store, Repositories};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let repos = Repositories::new(store::connect(&config.store)?);
//!
//! let newest = repos
//!     .posts
//!     .query_posts("community-1", None, Some(PostQuery::newest()))
//!     .await?;
//! println!("{} posts", newest.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod repository;
pub mod store;

use std::sync::Arc;

pub use error::{ErrorCode, ServiceError, ServiceResult};
pub use repository::{CommentRepository, PostRepository};

use store::DocumentStore;

/// Both repositories over one shared store
#[derive(Clone)]
pub struct Repositories {
    pub posts: PostRepository,
    pub comments: CommentRepository,
}

impl Repositories {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            posts: PostRepository::new(store.clone()),
            comments: CommentRepository::new(store),
        }
    }
}
