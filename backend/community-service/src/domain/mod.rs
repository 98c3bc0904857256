pub mod models;
pub mod query;

pub use models::{
    Bookmark, Category, Comment, CommentParent, CommunitySummary, Creator, Post, Subscription,
};
pub use query::{category_batches, PostQuery, CATEGORY_BATCH_SIZE};
