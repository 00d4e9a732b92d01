//! Per-post "notify me" subscriptions.
//!
//! Followers are users, roles or literal e-mail addresses attached to one
//! post.  Workflows with the followers receiver group notify them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use db::models::FollowerRow;
use db::repository::followers as follower_repo;

use crate::context::AppContext;
use crate::filters::is_plausible_address;
use crate::host::{Post, User};
use crate::models::{PostId, UserId};
use crate::receivers::{parse_email_entry, FOLLOWER_EMAIL, FOLLOWER_ROLE, FOLLOWER_USER};
use crate::EngineError;

/// Action name of the follow toggle.
pub const SUBSCRIPTION_ACTION: &str = "pp_notifications_user_post_subscription";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Follower {
    User(UserId),
    Role(String),
    Email(String),
}

impl Follower {
    fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => FOLLOWER_USER,
            Self::Role(_) => FOLLOWER_ROLE,
            Self::Email(_) => FOLLOWER_EMAIL,
        }
    }

    fn value(&self) -> String {
        match self {
            Self::User(id) => id.to_string(),
            Self::Role(role) => role.clone(),
            Self::Email(entry) => entry.trim().to_owned(),
        }
    }
}

impl TryFrom<FollowerRow> for Follower {
    type Error = EngineError;

    fn try_from(row: FollowerRow) -> Result<Self, Self::Error> {
        match row.kind.as_str() {
            FOLLOWER_USER => row
                .value
                .parse()
                .map(Self::User)
                .map_err(|_| EngineError::Corrupt(format!("follower user id '{}'", row.value))),
            FOLLOWER_ROLE => Ok(Self::Role(row.value)),
            FOLLOWER_EMAIL => Ok(Self::Email(row.value)),
            other => Err(EngineError::Corrupt(format!("unknown follower kind '{other}'"))),
        }
    }
}

impl fmt::Display for Follower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.value())
    }
}

pub struct Subscriptions {
    ctx: Arc<AppContext>,
}

impl Subscriptions {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Follow or unfollow `post_id` on behalf of `user_id`.  Returns whether
    /// the user follows the post afterwards.
    pub async fn toggle(&self, post_id: PostId, user_id: UserId, follow: bool, actor_id: UserId) -> Result<bool, EngineError> {
        let (post, actor) = self.authorize(post_id, actor_id).await?;
        if self.ctx.directory.user(user_id).await.is_none() {
            return Err(EngineError::UserNotFound(user_id));
        }

        let follower = Follower::User(user_id);
        if follow {
            follower_repo::add_follower(&self.ctx.pool, post.id, follower.kind(), &follower.value()).await?;
        } else {
            follower_repo::remove_follower(&self.ctx.pool, post.id, follower.kind(), &follower.value()).await?;
        }
        info!(post_id, user_id, actor_id = actor.id, follow, "subscription changed");
        Ok(follow)
    }

    pub async fn followers(&self, post_id: PostId) -> Result<Vec<Follower>, EngineError> {
        follower_repo::list_followers(&self.ctx.pool, post_id)
            .await?
            .into_iter()
            .map(Follower::try_from)
            .collect()
    }

    pub async fn is_following(&self, post_id: PostId, user_id: UserId) -> Result<bool, EngineError> {
        Ok(self.followers(post_id).await?.contains(&Follower::User(user_id)))
    }

    /// Returns `false` when the follower was already present.
    pub async fn add(&self, post_id: PostId, follower: &Follower, actor_id: UserId) -> Result<bool, EngineError> {
        self.authorize(post_id, actor_id).await?;
        if let Follower::Email(entry) = follower {
            let (_, address) = parse_email_entry(entry);
            if !is_plausible_address(&address) {
                return Err(EngineError::InvalidInput(format!("malformed follower address '{entry}'")));
            }
        }
        Ok(follower_repo::add_follower(&self.ctx.pool, post_id, follower.kind(), &follower.value()).await?)
    }

    /// Returns `false` when there was nothing to remove.
    pub async fn remove(&self, post_id: PostId, follower: &Follower, actor_id: UserId) -> Result<bool, EngineError> {
        self.authorize(post_id, actor_id).await?;
        Ok(follower_repo::remove_follower(&self.ctx.pool, post_id, follower.kind(), &follower.value()).await?)
    }

    async fn authorize(&self, post_id: PostId, actor_id: UserId) -> Result<(Post, User), EngineError> {
        let post = self.ctx.directory.post(post_id).await.ok_or(EngineError::PostNotFound(post_id))?;
        let actor = self.ctx.directory.user(actor_id).await.ok_or(EngineError::UserNotFound(actor_id))?;
        if !actor.can_edit_post(&post) {
            return Err(EngineError::Forbidden(format!("user {actor_id} cannot edit post {post_id}")));
        }
        Ok((post, actor))
    }
}
