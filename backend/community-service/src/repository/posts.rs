use chrono::Utc;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    bookmarks_collection, posts_collection, require, store_failure, subscriptions_collection,
};
use crate::domain::models::{CATEGORIES, CATEGORY_ID, VOTES};
use crate::domain::{category_batches, Bookmark, Category, Post, PostQuery, Subscription};
use crate::error::{ServiceError, ServiceResult};
use crate::store::{
    Document, DocumentStore, Fields, FieldsExt, Query, StoreError, StoreResult, Value, WriteMode,
};

/// Repository for Post operations
#[derive(Clone)]
pub struct PostRepository {
    store: Arc<dyn DocumentStore>,
}

impl PostRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create a new post with a generated id
    ///
    /// Returns the post with `post_id` set. A post without `time_created` is
    /// stamped with the current time.
    pub async fn add_post(&self, mut post: Post) -> ServiceResult<Post> {
        require(&post.community_id, "community id")?;
        if post.time_created.is_none() {
            post.time_created = Some(Utc::now());
        }

        let post_id = self
            .store
            .add(&posts_collection(&post.community_id), post.to_fields())
            .await
            .map_err(store_failure("add_post"))?;

        debug!(community_id = %post.community_id, %post_id, "New post written");
        post.post_id = Some(post_id);
        Ok(post)
    }

    /// Merge the present attributes of `post` into the stored post
    ///
    /// Attributes left as `None` keep their stored value.
    pub async fn edit_post(&self, post: &Post) -> ServiceResult<()> {
        let community_id = require(&post.community_id, "community id")?;
        let post_id = post.require_id()?;

        self.store
            .set(
                &posts_collection(community_id).doc(post_id),
                post.to_fields(),
                WriteMode::Merge,
            )
            .await
            .map_err(store_failure("edit_post"))?;

        debug!(%community_id, %post_id, "Post edited");
        Ok(())
    }

    /// All posts of a community, in store order
    pub async fn get_posts(&self, community_id: &str) -> ServiceResult<Vec<Post>> {
        require(community_id, "community id")?;

        let docs = self
            .store
            .query(&Query::new(posts_collection(community_id)))
            .await
            .map_err(store_failure("get_posts"))?;

        debug!(%community_id, count = docs.len(), "Fetched posts");
        decode_posts(community_id, &docs)
    }

    pub async fn get_post(&self, community_id: &str, post_id: &str) -> ServiceResult<Option<Post>> {
        require(community_id, "community id")?;
        require(post_id, "post id")?;

        let doc = self
            .store
            .get(&posts_collection(community_id).doc(post_id))
            .await
            .map_err(store_failure("get_post"))?;

        doc.map(|doc| Post::from_document(community_id, &doc))
            .transpose()
    }

    /// Delete the post document
    ///
    /// Its comment sub-collection is not removed; those comments stay
    /// reachable only by direct path.
    pub async fn delete_post(&self, post: &Post) -> ServiceResult<()> {
        let community_id = require(&post.community_id, "community id")?;
        let post_id = post.require_id()?;

        self.store
            .delete(&posts_collection(community_id).doc(post_id))
            .await
            .map_err(store_failure("delete_post"))?;

        debug!(%community_id, %post_id, "Post deleted");
        Ok(())
    }

    /// Query posts by category and/or sort condition
    ///
    /// At least one of `categories` and `condition` must be given. Categories
    /// are matched in batches of ten ids, one `array-contains-any` sub-query
    /// per batch run concurrently with the shared ordering. Results are
    /// concatenated in batch order, so a post matched by several batches
    /// appears once per matching batch. If any batch fails the whole query
    /// fails.
    pub async fn query_posts(
        &self,
        community_id: &str,
        categories: Option<&[Category]>,
        condition: Option<PostQuery>,
    ) -> ServiceResult<Vec<Post>> {
        if categories.is_none() && condition.is_none() {
            return Err(ServiceError::NoCondition);
        }
        require(community_id, "community id")?;

        let mut base = Query::new(posts_collection(community_id));
        if let Some((field, direction)) = condition.and_then(|c| c.ordering()) {
            base = base.order_by(field, direction);
        }

        let Some(categories) = categories else {
            let docs = self
                .store
                .query(&base)
                .await
                .map_err(store_failure("query_posts"))?;
            debug!(%community_id, count = docs.len(), "Queried posts");
            return decode_posts(community_id, &docs);
        };

        let batches = category_batches(categories);
        let total = batches.len();
        let category_path = format!("{}.{}", CATEGORIES, CATEGORY_ID);

        let store = &self.store;
        let sub_queries = batches.into_iter().enumerate().map(|(batch, ids)| {
            let query = base.clone().where_array_contains_any(
                &category_path,
                ids.into_iter().map(Value::from).collect(),
            );
            async move {
                store.query(&query).await.map_err(|source| {
                    warn!(%community_id, batch, total, error = %source, "Category batch failed");
                    ServiceError::BatchFailed {
                        batch,
                        total,
                        source,
                    }
                })
            }
        });

        let results = try_join_all(sub_queries).await?;

        let docs: Vec<Document> = results.into_iter().flatten().collect();
        let posts = decode_posts(community_id, &docs)?;

        debug!(%community_id, batches = total, count = posts.len(), "Queried posts by category");
        Ok(posts)
    }

    /// Save a denormalized snapshot of `post` for `user_id`
    ///
    /// Duplicates are not checked; bookmarking twice stores two bookmarks.
    /// Returns the bookmark id.
    pub async fn bookmark_post(
        &self,
        post: &Post,
        user_id: &str,
        community_name: &str,
    ) -> ServiceResult<String> {
        require(&post.community_id, "community id")?;
        post.require_id()?;
        require(user_id, "user id")?;

        let bookmark = Bookmark::new(post, user_id, community_name);
        let bookmark_id = self
            .store
            .add(&bookmarks_collection(), bookmark.to_fields())
            .await
            .map_err(store_failure("bookmark_post"))?;

        debug!(%user_id, %bookmark_id, "Bookmark written");
        Ok(bookmark_id)
    }

    /// Subscribe `user_id` to a post; duplicates are not checked
    pub async fn subscribe_post(
        &self,
        community_id: &str,
        post_id: &str,
        user_id: &str,
    ) -> ServiceResult<String> {
        let subscription = Subscription {
            community_id: require(community_id, "community id")?.to_string(),
            post_id: require(post_id, "post id")?.to_string(),
            user_id: require(user_id, "user id")?.to_string(),
        };

        let subscription_id = self
            .store
            .add(&subscriptions_collection(), subscription.to_fields())
            .await
            .map_err(store_failure("subscribe_post"))?;

        debug!(%user_id, %post_id, %subscription_id, "Subscription written");
        Ok(subscription_id)
    }

    /// Atomically add `delta` to the post's `votes` and return the new count
    ///
    /// Runs as a single store transaction; conflicting updates are retried by
    /// the store, never here. A post without `votes` counts from zero.
    pub async fn update_vote_count(
        &self,
        community_id: &str,
        post_id: &str,
        delta: i64,
    ) -> ServiceResult<i64> {
        require(community_id, "community id")?;
        require(post_id, "post id")?;

        let path = posts_collection(community_id).doc(post_id);
        let mutation = move |doc: &Document| -> StoreResult<Fields> {
            let current = doc.fields.opt_i64(VOTES)?.unwrap_or(0);
            let updated = current.checked_add(delta).ok_or_else(|| {
                StoreError::InvalidDocument(format!("vote count overflow on {}", doc.id))
            })?;
            Ok(Fields::from([(VOTES.to_string(), Value::Integer(updated))]))
        };

        let written = match self.store.run_transaction(&path, &mutation).await {
            Ok(written) => written,
            Err(StoreError::NotFound(_)) => {
                warn!(%community_id, %post_id, "Vote on missing post");
                return Err(ServiceError::NotFound(format!("post {}", post_id)));
            }
            Err(e) => return Err(store_failure("update_vote_count")(e)),
        };

        let votes = written.opt_i64(VOTES)?.unwrap_or(0);
        debug!(%community_id, %post_id, delta, votes, "Vote transaction committed");
        Ok(votes)
    }
}

fn decode_posts(community_id: &str, docs: &[Document]) -> ServiceResult<Vec<Post>> {
    docs.iter()
        .map(|doc| Post::from_document(community_id, doc))
        .collect()
}
