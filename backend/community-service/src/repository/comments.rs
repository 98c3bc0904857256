use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{comments_collection, require, store_failure};
use crate::domain::models::REPLY_COMMENT_ID;
use crate::domain::{Comment, CommentParent, Post};
use crate::error::{ServiceError, ServiceResult};
use crate::store::{Document, DocumentStore, Query, WriteMode};

/// Repository for Comment operations
#[derive(Clone)]
pub struct CommentRepository {
    store: Arc<dyn DocumentStore>,
}

impl CommentRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create a comment under `parent`
    ///
    /// The new comment takes its community and post from the parent. A
    /// comment parent makes it a reply; the parent comment must exist.
    pub async fn create_comment(
        &self,
        parent: &CommentParent,
        mut comment: Comment,
    ) -> ServiceResult<Comment> {
        let community_id = require(parent.community_id(), "community id")?;
        let post_id = require(parent.post_id(), "post id")?;
        let collection = comments_collection(community_id, post_id);

        if let Some(reply_to) = parent.reply_comment_id() {
            require(reply_to, "parent comment id")?;
            let exists = self
                .store
                .get(&collection.doc(reply_to))
                .await
                .map_err(store_failure("create_comment"))?
                .is_some();
            if !exists {
                warn!(%community_id, %post_id, %reply_to, "Reply to missing comment");
                return Err(ServiceError::InvalidInput(format!(
                    "parent comment {} does not exist",
                    reply_to
                )));
            }
        }

        comment.community_id = community_id.to_string();
        comment.post_id = post_id.to_string();
        comment.reply_comment_id = parent.reply_comment_id().map(str::to_string);
        if comment.time_created.is_none() {
            comment.time_created = Some(Utc::now());
        }

        let comment_id = self
            .store
            .add(&collection, comment.to_fields())
            .await
            .map_err(store_failure("create_comment"))?;

        debug!(%community_id, %post_id, %comment_id, reply = comment.is_reply(), "Comment written");
        comment.comment_id = Some(comment_id);
        Ok(comment)
    }

    /// Comments of `post` that reply to nothing
    pub async fn load_top_level_comments(&self, post: &Post) -> ServiceResult<Vec<Comment>> {
        let community_id = require(&post.community_id, "community id")?;
        let post_id = post.require_id()?;

        let query =
            Query::new(comments_collection(community_id, post_id)).where_null(REPLY_COMMENT_ID);
        self.load(community_id, post_id, &query, "load_top_level_comments")
            .await
    }

    /// Direct replies to `comment`
    pub async fn load_replies(&self, comment: &Comment) -> ServiceResult<Vec<Comment>> {
        let community_id = require(&comment.community_id, "community id")?;
        let post_id = require(&comment.post_id, "post id")?;
        let comment_id = comment.require_id()?;

        let query = Query::new(comments_collection(community_id, post_id))
            .where_equal_to(REPLY_COMMENT_ID, comment_id);
        self.load(community_id, post_id, &query, "load_replies").await
    }

    async fn load(
        &self,
        community_id: &str,
        post_id: &str,
        query: &Query,
        operation: &'static str,
    ) -> ServiceResult<Vec<Comment>> {
        let docs = self
            .store
            .query(query)
            .await
            .map_err(store_failure(operation))?;

        debug!(%community_id, %post_id, count = docs.len(), operation, "Loaded comments");
        docs.iter()
            .map(|doc| Comment::from_document(community_id, post_id, doc))
            .collect()
    }

    pub async fn get_comment(
        &self,
        community_id: &str,
        post_id: &str,
        comment_id: &str,
    ) -> ServiceResult<Option<Comment>> {
        let path = comments_collection(
            require(community_id, "community id")?,
            require(post_id, "post id")?,
        )
        .doc(require(comment_id, "comment id")?);

        let doc: Option<Document> = self
            .store
            .get(&path)
            .await
            .map_err(store_failure("get_comment"))?;

        doc.map(|doc| Comment::from_document(community_id, post_id, &doc))
            .transpose()
    }

    /// Delete one comment; its replies are left in place
    pub async fn delete_comment(&self, comment: &Comment) -> ServiceResult<()> {
        let community_id = require(&comment.community_id, "community id")?;
        let post_id = require(&comment.post_id, "post id")?;
        let comment_id = comment.require_id()?;

        self.store
            .delete(&comments_collection(community_id, post_id).doc(comment_id))
            .await
            .map_err(store_failure("delete_comment"))?;

        debug!(%community_id, %post_id, %comment_id, "Comment deleted");
        Ok(())
    }

    /// Replace the stored comment with `comment`
    pub async fn update_comment(&self, comment: Comment) -> ServiceResult<Comment> {
        let community_id = require(&comment.community_id, "community id")?;
        let post_id = require(&comment.post_id, "post id")?;
        let comment_id = comment.require_id()?;

        self.store
            .set(
                &comments_collection(community_id, post_id).doc(comment_id),
                comment.to_fields(),
                WriteMode::Overwrite,
            )
            .await
            .map_err(store_failure("update_comment"))?;

        debug!(%community_id, %post_id, %comment_id, "Comment updated");
        Ok(comment)
    }
}
