//! Receiver resolution.
//!
//! Expands a workflow's [`ReceiverSpec`](crate::models::ReceiverSpec) into
//! concrete, deduplicated receivers for one dispatch.  Nothing is cached:
//! role membership and followers are read again on every resolution.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use channels::Recipient;
use db::repository::followers as follower_repo;

use crate::context::{AppContext, DispatchContext};
use crate::host::{Directory, User};
use crate::models::UserId;
use crate::EngineError;

pub const GROUP_AUTHOR: &str = "author";
pub const GROUP_SITE_ADMIN: &str = "site_admin";
pub const GROUP_USERS: &str = "users";
pub const GROUP_ROLES: &str = "roles";
pub const GROUP_FOLLOWERS: &str = "followers";
pub const GROUP_EMAILS: &str = "emails";

/// Follower kinds stored per post.
pub const FOLLOWER_USER: &str = "pp_notify_user";
pub const FOLLOWER_ROLE: &str = "pp_notify_role";
pub const FOLLOWER_EMAIL: &str = "pp_notify_email";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReceiverTarget {
    User { id: UserId },
    Email { name: Option<String>, address: String },
}

/// One resolved notification target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub target: ReceiverTarget,
    pub address: String,
    pub display_name: String,
    /// Origin group, e.g. `author` or `roles`.
    pub group: String,
    /// Role name or follower kind within the group.
    pub subgroup: Option<String>,
    /// Assigned during resolution; empty until then.
    pub channel: String,
}

impl Receiver {
    pub fn user(user: &User, group: &str, subgroup: Option<&str>) -> Self {
        Self {
            target: ReceiverTarget::User { id: user.id },
            address: user.email.trim().to_owned(),
            display_name: user.display_name.clone(),
            group: group.to_owned(),
            subgroup: subgroup.map(str::to_owned),
            channel: String::new(),
        }
    }

    pub fn email(name: Option<String>, address: String, group: &str, subgroup: Option<&str>) -> Self {
        Self {
            display_name: name.clone().unwrap_or_else(|| address.clone()),
            target: ReceiverTarget::Email { name, address: address.clone() },
            address,
            group: group.to_owned(),
            subgroup: subgroup.map(str::to_owned),
            channel: String::new(),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self.target {
            ReceiverTarget::User { id } => Some(id),
            ReceiverTarget::Email { .. } => None,
        }
    }

    /// Value written to the log's `receiver` column.
    pub fn log_key(&self) -> String {
        self.address.to_lowercase()
    }

    pub fn recipient(&self) -> Recipient {
        Recipient {
            address: self.address.clone(),
            name: Some(self.display_name.clone()).filter(|n| !n.is_empty()),
            user_id: self.user_id(),
        }
    }
}

/// Split `Name / address` at the last `/`.  Entries without a separator are
/// a bare address.
pub fn parse_email_entry(entry: &str) -> (Option<String>, String) {
    match entry.rsplit_once('/') {
        Some((name, address)) => {
            let name = name.trim();
            let name = (!name.is_empty()).then(|| name.to_owned());
            (name, address.trim().to_owned())
        }
        None => (None, entry.trim().to_owned()),
    }
}

/// Extension point contributing an extra receiver group.
#[async_trait]
pub trait ReceiverGroupProvider: Send + Sync {
    fn group(&self) -> &str;

    async fn receivers(&self, ctx: &DispatchContext, directory: &dyn Directory) -> Vec<Receiver>;
}

pub struct ReceiverResolver<'a> {
    app: &'a AppContext,
}

impl<'a> ReceiverResolver<'a> {
    pub fn new(app: &'a AppContext) -> Self {
        Self { app }
    }

    /// Resolve, deduplicate, filter and assign channels.
    pub async fn resolve(&self, ctx: &DispatchContext) -> Result<Vec<Receiver>, EngineError> {
        let candidates = self.collect(ctx).await?;

        let notify_actor = self
            .app
            .policies
            .notify_actor(ctx)
            .unwrap_or(self.app.config.notify_actor);
        let actor_address = ctx.actor.as_ref().map(|a| a.email.trim().to_lowercase());

        let mut seen = HashSet::new();
        let mut receivers = Vec::with_capacity(candidates.len());
        for receiver in candidates {
            let key = receiver.log_key();
            if key.is_empty() || !seen.insert(key.clone()) {
                continue;
            }
            if !notify_actor {
                let is_actor = receiver.user_id() == Some(ctx.event.actor_id)
                    || actor_address.as_deref() == Some(key.as_str());
                if is_actor {
                    debug!(workflow_id = ctx.workflow.id, "excluding acting user from receivers");
                    continue;
                }
            }
            receivers.push(receiver);
        }

        self.app.policies.filter_receivers(ctx, &mut receivers);

        for receiver in &mut receivers {
            receiver.channel = self.channel_for(ctx, receiver);
        }
        Ok(receivers)
    }

    async fn collect(&self, ctx: &DispatchContext) -> Result<Vec<Receiver>, EngineError> {
        let directory = self.app.directory.as_ref();
        let spec = &ctx.workflow.receivers;
        let mut out = Vec::new();

        if spec.author {
            if let Some(post) = &ctx.post {
                if let Some(author) = directory.user(post.author_id).await {
                    push_user(&mut out, &author, GROUP_AUTHOR, None);
                }
            }
        }

        if spec.site_admin {
            for admin in directory.users_with_role("administrator").await {
                push_user(&mut out, &admin, GROUP_SITE_ADMIN, None);
            }
        }

        for id in &spec.users {
            match directory.user(*id).await {
                Some(user) => push_user(&mut out, &user, GROUP_USERS, None),
                None => debug!(user_id = id, "configured receiver no longer exists"),
            }
        }

        for role in &spec.roles {
            for user in directory.users_with_role(role).await {
                push_user(&mut out, &user, GROUP_ROLES, Some(role));
            }
        }

        if spec.followers {
            let post_id = ctx.post_id();
            for row in follower_repo::list_followers(&self.app.pool, post_id).await? {
                match row.kind.as_str() {
                    FOLLOWER_USER => {
                        let Ok(id) = row.value.parse::<UserId>() else { continue };
                        if let Some(user) = directory.user(id).await {
                            push_user(&mut out, &user, GROUP_FOLLOWERS, Some(FOLLOWER_USER));
                        }
                    }
                    FOLLOWER_ROLE => {
                        for user in directory.users_with_role(&row.value).await {
                            push_user(&mut out, &user, GROUP_FOLLOWERS, Some(FOLLOWER_ROLE));
                        }
                    }
                    FOLLOWER_EMAIL => {
                        let (name, address) = parse_email_entry(&row.value);
                        out.push(Receiver::email(name, address, GROUP_FOLLOWERS, Some(FOLLOWER_EMAIL)));
                    }
                    other => debug!(post_id, kind = other, "ignoring unknown follower kind"),
                }
            }
        }

        for entry in &spec.emails {
            let (name, address) = parse_email_entry(entry);
            out.push(Receiver::email(name, address, GROUP_EMAILS, None));
        }

        for provider in &self.app.receiver_groups {
            out.extend(provider.receivers(ctx, directory).await);
        }

        Ok(out)
    }

    fn channel_for(&self, ctx: &DispatchContext, receiver: &Receiver) -> String {
        if let Some(channel) = self.app.policies.default_channel(ctx, receiver) {
            return channel;
        }
        ctx.workflow
            .channels
            .enabled()
            .find(|name| self.app.channels.contains_key(*name))
            .map(str::to_owned)
            .unwrap_or_else(|| self.app.config.default_channel.clone())
    }
}

fn push_user(out: &mut Vec<Receiver>, user: &User, group: &str, subgroup: Option<&str>) {
    if user.active {
        out.push(Receiver::user(user, group, subgroup));
    }
}
