//! The host content system as seen by the engine.
//!
//! Posts, users, roles and editorial comments belong to the host; the engine
//! only reads them through [`Directory`].  [`InMemoryDirectory`] is the
//! implementation the HTTP surface keeps in sync and tests populate directly.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{PostId, UserId};

/// Taxonomy whose terms feed the category filter.
pub const CATEGORY_TAXONOMY: &str = "category";

/// Comment type used for editorial comments.
pub const EDITORIAL_COMMENT_TYPE: &str = "editorial-comment";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub post_type: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub excerpt: String,
    pub status: String,
    pub author_id: UserId,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub edit_link: String,
    /// Terms keyed by taxonomy.
    #[serde(default)]
    pub terms: BTreeMap<String, Vec<Term>>,
}

impl Post {
    pub fn terms_of(&self, taxonomy: &str) -> &[Term] {
        self.terms.get(taxonomy).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn category_ids(&self) -> Vec<i64> {
        self.terms_of(CATEGORY_TAXONOMY).iter().map(|t| t.id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Inactive users (removed from the site, spam, …) never receive mail.
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Administrators hold every capability.
    pub fn can(&self, capability: &str) -> bool {
        self.has_role("administrator") || self.capabilities.contains(capability)
    }

    /// Whether this user may edit `post`.
    pub fn can_edit_post(&self, post: &Post) -> bool {
        if post.author_id == self.id {
            self.can("edit_posts")
        } else {
            self.can("edit_others_posts")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorialComment {
    pub id: i64,
    pub post_id: PostId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    pub content: String,
    pub date: DateTime<Utc>,
    #[serde(default = "editorial_comment_type")]
    pub comment_type: String,
}

fn editorial_comment_type() -> String {
    EDITORIAL_COMMENT_TYPE.into()
}

impl EditorialComment {
    pub fn is_editorial(&self) -> bool {
        self.comment_type == EDITORIAL_COMMENT_TYPE
    }
}

/// Read access to host content.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn post(&self, id: PostId) -> Option<Post>;

    async fn user(&self, id: UserId) -> Option<User>;

    /// Active users currently holding `role` on this site.
    async fn users_with_role(&self, role: &str) -> Vec<User>;

    async fn comment(&self, id: i64) -> Option<EditorialComment>;
}

/// A directory held in memory.
#[derive(Default)]
pub struct InMemoryDirectory {
    posts: RwLock<HashMap<PostId, Post>>,
    users: RwLock<HashMap<UserId, User>>,
    comments: RwLock<HashMap<i64, EditorialComment>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_post(&self, post: Post) {
        self.posts.write().unwrap_or_else(|e| e.into_inner()).insert(post.id, post);
    }

    pub fn upsert_user(&self, user: User) {
        self.users.write().unwrap_or_else(|e| e.into_inner()).insert(user.id, user);
    }

    pub fn upsert_comment(&self, comment: EditorialComment) {
        self.comments.write().unwrap_or_else(|e| e.into_inner()).insert(comment.id, comment);
    }

    pub fn remove_user(&self, id: UserId) -> Option<User> {
        self.users.write().unwrap_or_else(|e| e.into_inner()).remove(&id)
    }

    pub fn get_post(&self, id: PostId) -> Option<Post> {
        self.posts.read().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    pub fn get_user(&self, id: UserId) -> Option<User> {
        self.users.read().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn post(&self, id: PostId) -> Option<Post> {
        self.get_post(id)
    }

    async fn user(&self, id: UserId) -> Option<User> {
        self.get_user(id)
    }

    async fn users_with_role(&self, role: &str) -> Vec<User> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<User> = users
            .values()
            .filter(|u| u.active && u.has_role(role))
            .cloned()
            .collect();
        found.sort_by_key(|u| u.id);
        found
    }

    async fn comment(&self, id: i64) -> Option<EditorialComment> {
        self.comments.read().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }
}
