use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};
use crate::store::{Document, Fields, FieldsExt, StoreError, Value};

// Stored field names
pub const COMMUNITY_ID: &str = "communityID";
pub const POST_ID: &str = "postID";
pub const USER_ID: &str = "userID";
pub const CREATOR: &str = "creator";
pub const TITLE: &str = "title";
pub const CONTENT: &str = "content";
pub const TIME_CREATED: &str = "timeCreated";
pub const CATEGORIES: &str = "categories";
pub const CATEGORY_ID: &str = "categoryID";
pub const VOTES: &str = "votes";
pub const VOTE_DIFFERENCE: &str = "voteDifference";
pub const TOTAL_COMMENT: &str = "totalComment";
pub const IS_ANONYMOUS: &str = "isAnonymous";
pub const IMAGE: &str = "image";
pub const TAGGED_USERS: &str = "taggedUsers";
pub const REPLY_COMMENT_ID: &str = "replyCommentID";
pub const COMMUNITY: &str = "community";
pub const POST: &str = "post";
pub const NAME: &str = "name";
pub const PROFILE_PICTURE: &str = "profilePicture";

fn decode_error(id: &str) -> impl FnOnce(StoreError) -> ServiceError + '_ {
    move |err| ServiceError::Decode {
        id: id.to_string(),
        message: match err {
            StoreError::InvalidDocument(message) => message,
            other => other.to_string(),
        },
    }
}

fn missing_field(id: &str, field: &str) -> ServiceError {
    ServiceError::Decode {
        id: id.to_string(),
        message: format!("missing field `{}`", field),
    }
}

fn insert_opt(fields: &mut Fields, key: &str, value: Option<impl Into<Value>>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), value.into());
    }
}

fn strings_value(items: &[String]) -> Value {
    Value::Array(items.iter().map(|s| Value::from(s.as_str())).collect())
}

/// Tag attached to posts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(rename = "categoryID")]
    pub category_id: String,
    pub name: Option<String>,
}

impl Category {
    pub fn new(category_id: impl Into<String>) -> Self {
        Self {
            category_id: category_id.into(),
            name: None,
        }
    }

    fn to_value(&self) -> Value {
        let mut fields = Fields::from([(
            CATEGORY_ID.to_string(),
            Value::from(self.category_id.as_str()),
        )]);
        insert_opt(&mut fields, NAME, self.name.as_deref());
        Value::Map(fields)
    }

    fn from_fields(doc_id: &str, fields: &Fields) -> ServiceResult<Self> {
        Ok(Self {
            category_id: fields
                .opt_string(CATEGORY_ID)
                .map_err(decode_error(doc_id))?
                .ok_or_else(|| missing_field(doc_id, CATEGORY_ID))?,
            name: fields.opt_string(NAME).map_err(decode_error(doc_id))?,
        })
    }
}

/// Author summary embedded in posts, comments and bookmarks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub name: Option<String>,
    pub profile_picture: Option<String>,
}

impl Creator {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: Some(name.into()),
            profile_picture: None,
        }
    }

    fn to_value(&self) -> Value {
        let mut fields = Fields::from([(USER_ID.to_string(), Value::from(self.user_id.as_str()))]);
        insert_opt(&mut fields, NAME, self.name.as_deref());
        insert_opt(&mut fields, PROFILE_PICTURE, self.profile_picture.as_deref());
        Value::Map(fields)
    }

    fn decode(doc_id: &str, fields: &Fields) -> ServiceResult<Option<Self>> {
        let Some(map) = fields.opt_map(CREATOR).map_err(decode_error(doc_id))? else {
            return Ok(None);
        };
        Ok(Some(Self {
            user_id: map
                .opt_string(USER_ID)
                .map_err(decode_error(doc_id))?
                .ok_or_else(|| missing_field(doc_id, "creator.userID"))?,
            name: map.opt_string(NAME).map_err(decode_error(doc_id))?,
            profile_picture: map.opt_string(PROFILE_PICTURE).map_err(decode_error(doc_id))?,
        }))
    }
}

/// Forum post
///
/// Everything but the community id is optional so the same value can carry a
/// partial update (see `PostRepository::edit_post`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(rename = "communityID")]
    pub community_id: String,
    #[serde(rename = "postID")]
    pub post_id: Option<String>,
    pub creator: Option<Creator>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub time_created: Option<DateTime<Utc>>,
    pub categories: Option<Vec<Category>>,
    pub votes: Option<i64>,
    pub vote_difference: Option<i64>,
    pub total_comment: Option<i64>,
    pub is_anonymous: Option<bool>,
    pub image: Option<Vec<String>>,
    pub tagged_users: Option<Vec<String>>,
}

impl Post {
    pub fn new(community_id: impl Into<String>) -> Self {
        Self {
            community_id: community_id.into(),
            ..Default::default()
        }
    }

    /// Reference to an existing post, e.g. for partial edits
    pub fn with_id(community_id: impl Into<String>, post_id: impl Into<String>) -> Self {
        Self {
            post_id: Some(post_id.into()),
            ..Self::new(community_id)
        }
    }

    /// Post id, or an input error when the post was never stored
    pub fn require_id(&self) -> ServiceResult<&str> {
        self.post_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ServiceError::InvalidInput("post id is required".to_string()))
    }

    /// Stored representation; absent attributes are left out
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(COMMUNITY_ID.to_string(), Value::from(self.community_id.as_str()));
        insert_opt(&mut fields, CREATOR, self.creator.as_ref().map(Creator::to_value));
        insert_opt(&mut fields, TITLE, self.title.as_deref());
        insert_opt(&mut fields, CONTENT, self.content.as_deref());
        insert_opt(&mut fields, TIME_CREATED, self.time_created);
        insert_opt(
            &mut fields,
            CATEGORIES,
            self.categories
                .as_ref()
                .map(|cats| Value::Array(cats.iter().map(Category::to_value).collect())),
        );
        insert_opt(&mut fields, VOTES, self.votes);
        insert_opt(&mut fields, VOTE_DIFFERENCE, self.vote_difference);
        insert_opt(&mut fields, TOTAL_COMMENT, self.total_comment);
        insert_opt(&mut fields, IS_ANONYMOUS, self.is_anonymous);
        insert_opt(&mut fields, IMAGE, self.image.as_deref().map(strings_value));
        insert_opt(&mut fields, TAGGED_USERS, self.tagged_users.as_deref().map(strings_value));
        fields
    }

    pub fn from_document(community_id: &str, doc: &Document) -> ServiceResult<Self> {
        Self::from_fields(community_id, &doc.id, &doc.fields)
    }

    fn from_fields(community_id: &str, post_id: &str, fields: &Fields) -> ServiceResult<Self> {
        let err = || decode_error(post_id);

        let categories = match fields.opt_array(CATEGORIES).map_err(err())? {
            None => None,
            Some(items) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Map(map) => Category::from_fields(post_id, map),
                        other => Err(ServiceError::Decode {
                            id: post_id.to_string(),
                            message: format!("category expected map, found {}", other.type_name()),
                        }),
                    })
                    .collect::<ServiceResult<Vec<_>>>()?,
            ),
        };

        Ok(Self {
            community_id: community_id.to_string(),
            post_id: Some(post_id.to_string()),
            creator: Creator::decode(post_id, fields)?,
            title: fields.opt_string(TITLE).map_err(err())?,
            content: fields.opt_string(CONTENT).map_err(err())?,
            time_created: fields.opt_timestamp(TIME_CREATED).map_err(err())?,
            categories,
            votes: fields.opt_i64(VOTES).map_err(err())?,
            vote_difference: fields.opt_i64(VOTE_DIFFERENCE).map_err(err())?,
            total_comment: fields.opt_i64(TOTAL_COMMENT).map_err(err())?,
            is_anonymous: fields.opt_bool(IS_ANONYMOUS).map_err(err())?,
            image: fields.opt_strings(IMAGE).map_err(err())?,
            tagged_users: fields.opt_strings(TAGGED_USERS).map_err(err())?,
        })
    }
}

/// Comment on a post, optionally replying to another comment of the same post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "communityID")]
    pub community_id: String,
    #[serde(rename = "postID")]
    pub post_id: String,
    #[serde(rename = "commentID")]
    pub comment_id: Option<String>,
    pub creator: Option<Creator>,
    pub content: Option<String>,
    pub time_created: Option<DateTime<Utc>>,
    #[serde(rename = "replyCommentID")]
    pub reply_comment_id: Option<String>,
}

impl Comment {
    /// Unsaved comment; placement comes from the parent on creation
    pub fn new(creator: Creator, content: impl Into<String>) -> Self {
        Self {
            creator: Some(creator),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn require_id(&self) -> ServiceResult<&str> {
        self.comment_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ServiceError::InvalidInput("comment id is required".to_string()))
    }

    pub fn is_reply(&self) -> bool {
        self.reply_comment_id.is_some()
    }

    /// Stored representation
    ///
    /// `replyCommentID` is always written, as null for top-level comments,
    /// because the top-level query matches on a present null.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(COMMUNITY_ID.to_string(), Value::from(self.community_id.as_str()));
        fields.insert(POST_ID.to_string(), Value::from(self.post_id.as_str()));
        fields.insert(
            REPLY_COMMENT_ID.to_string(),
            Value::from(self.reply_comment_id.as_deref()),
        );
        insert_opt(&mut fields, CREATOR, self.creator.as_ref().map(Creator::to_value));
        insert_opt(&mut fields, CONTENT, self.content.as_deref());
        insert_opt(&mut fields, TIME_CREATED, self.time_created);
        fields
    }

    pub fn from_document(community_id: &str, post_id: &str, doc: &Document) -> ServiceResult<Self> {
        let err = || decode_error(&doc.id);
        Ok(Self {
            community_id: community_id.to_string(),
            post_id: post_id.to_string(),
            comment_id: Some(doc.id.clone()),
            creator: Creator::decode(&doc.id, &doc.fields)?,
            content: doc.fields.opt_string(CONTENT).map_err(err())?,
            time_created: doc.fields.opt_timestamp(TIME_CREATED).map_err(err())?,
            reply_comment_id: doc.fields.opt_string(REPLY_COMMENT_ID).map_err(err())?,
        })
    }
}

/// Where a new comment attaches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentParent {
    /// Top-level comment on a post
    Post {
        community_id: String,
        post_id: String,
    },
    /// Reply to an existing comment
    Comment {
        community_id: String,
        post_id: String,
        comment_id: String,
    },
}

impl CommentParent {
    pub fn post(post: &Post) -> ServiceResult<Self> {
        Ok(CommentParent::Post {
            community_id: post.community_id.clone(),
            post_id: post.require_id()?.to_string(),
        })
    }

    pub fn comment(comment: &Comment) -> ServiceResult<Self> {
        Ok(CommentParent::Comment {
            community_id: comment.community_id.clone(),
            post_id: comment.post_id.clone(),
            comment_id: comment.require_id()?.to_string(),
        })
    }

    pub fn community_id(&self) -> &str {
        match self {
            CommentParent::Post { community_id, .. }
            | CommentParent::Comment { community_id, .. } => community_id,
        }
    }

    pub fn post_id(&self) -> &str {
        match self {
            CommentParent::Post { post_id, .. } | CommentParent::Comment { post_id, .. } => post_id,
        }
    }

    /// Reply-parent written onto the new comment
    pub fn reply_comment_id(&self) -> Option<&str> {
        match self {
            CommentParent::Post { .. } => None,
            CommentParent::Comment { comment_id, .. } => Some(comment_id),
        }
    }
}

/// Follow-up notifications for a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "communityID")]
    pub community_id: String,
    #[serde(rename = "postID")]
    pub post_id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
}

impl Subscription {
    pub fn to_fields(&self) -> Fields {
        Fields::from([
            (COMMUNITY_ID.to_string(), Value::from(self.community_id.as_str())),
            (POST_ID.to_string(), Value::from(self.post_id.as_str())),
            (USER_ID.to_string(), Value::from(self.user_id.as_str())),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunitySummary {
    #[serde(rename = "communityID")]
    pub community_id: String,
    pub name: String,
}

/// Saved post, stored as a denormalized snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub community: CommunitySummary,
    pub creator: Option<Creator>,
    pub post: Post,
}

impl Bookmark {
    pub fn new(post: &Post, user_id: impl Into<String>, community_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            community: CommunitySummary {
                community_id: post.community_id.clone(),
                name: community_name.into(),
            },
            creator: post.creator.clone(),
            post: post.clone(),
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut post = self.post.to_fields();
        insert_opt(&mut post, POST_ID, self.post.post_id.as_deref());

        let mut fields = Fields::from([
            (USER_ID.to_string(), Value::from(self.user_id.as_str())),
            (
                COMMUNITY.to_string(),
                Value::Map(Fields::from([
                    (COMMUNITY_ID.to_string(), Value::from(self.community.community_id.as_str())),
                    (NAME.to_string(), Value::from(self.community.name.as_str())),
                ])),
            ),
            (POST.to_string(), Value::Map(post)),
        ]);
        insert_opt(&mut fields, CREATOR, self.creator.as_ref().map(Creator::to_value));
        fields
    }

    pub fn from_document(doc: &Document) -> ServiceResult<Self> {
        let err = || decode_error(&doc.id);
        let community = doc
            .fields
            .opt_map(COMMUNITY)
            .map_err(err())?
            .ok_or_else(|| missing_field(&doc.id, COMMUNITY))?;
        let community_id = community
            .opt_string(COMMUNITY_ID)
            .map_err(err())?
            .ok_or_else(|| missing_field(&doc.id, "community.communityID"))?;
        let post_fields = doc
            .fields
            .opt_map(POST)
            .map_err(err())?
            .ok_or_else(|| missing_field(&doc.id, POST))?;
        let post_id = post_fields
            .opt_string(POST_ID)
            .map_err(err())?
            .unwrap_or_default();

        Ok(Self {
            user_id: doc
                .fields
                .opt_string(USER_ID)
                .map_err(err())?
                .ok_or_else(|| missing_field(&doc.id, USER_ID))?,
            community: CommunitySummary {
                community_id: community_id.clone(),
                name: community.opt_string(NAME).map_err(err())?.unwrap_or_default(),
            },
            creator: Creator::decode(&doc.id, &doc.fields)?,
            post: Post::from_fields(&community_id, &post_id, post_fields)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_post() -> Post {
        Post {
            title: Some("Exam tips".into()),
            creator: Some(Creator::new("u1", "Lan")),
            categories: Some(vec![Category::new("math"), Category::new("physics")]),
            votes: Some(3),
            is_anonymous: Some(false),
            image: Some(vec!["posts/p1/0.jpg".into()]),
            ..Post::with_id("c1", "p1")
        }
    }

    #[test]
    fn test_post_fields_skip_absent_attributes() {
        let fields = Post::with_id("c1", "p1").to_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get(COMMUNITY_ID), Some(&Value::from("c1")));
    }

    #[test]
    fn test_post_decodes_its_own_fields() {
        let post = sample_post();
        let doc = Document {
            id: "p1".into(),
            fields: post.to_fields(),
        };
        assert_eq!(Post::from_document("c1", &doc).unwrap(), post);
    }

    #[test]
    fn test_post_type_mismatch_is_decode_error() {
        let doc = Document {
            id: "p9".into(),
            fields: Fields::from([(VOTES.to_string(), Value::from("many"))]),
        };
        match Post::from_document("c1", &doc) {
            Err(ServiceError::Decode { id, message }) => {
                assert_eq!(id, "p9");
                assert!(message.contains("votes"));
            }
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_top_level_comment_writes_null_reply_parent() {
        let comment = Comment::new(Creator::new("u1", "Lan"), "hi");
        assert_eq!(comment.to_fields().get(REPLY_COMMENT_ID), Some(&Value::Null));
    }

    #[test]
    fn test_parent_requires_ids() {
        assert!(matches!(
            CommentParent::post(&Post::new("c1")),
            Err(ServiceError::InvalidInput(_))
        ));

        let reply_target = Comment {
            community_id: "c1".into(),
            post_id: "p1".into(),
            comment_id: Some("k1".into()),
            ..Default::default()
        };
        let parent = CommentParent::comment(&reply_target).unwrap();
        assert_eq!(parent.reply_comment_id(), Some("k1"));
        assert_eq!(parent.post_id(), "p1");
    }

    #[test]
    fn test_bookmark_embeds_post_snapshot() {
        let bookmark = Bookmark::new(&sample_post(), "u2", "Calculus 101");
        let doc = Document {
            id: "b1".into(),
            fields: bookmark.to_fields(),
        };

        let decoded = Bookmark::from_document(&doc).unwrap();
        assert_eq!(decoded, bookmark);
        assert_eq!(decoded.community.name, "Calculus 101");
        assert_eq!(decoded.post.post_id.as_deref(), Some("p1"));
    }
}
