//! Explicitly passed application context.
//!
//! Everything the pipeline needs (store, host directory, channels, policy
//! chain, renderer, clock, task queue) is built once and shared as an
//! `Arc<AppContext>`.

use std::collections::HashMap;
use std::sync::Arc;

use channels::Channel;
use db::DbPool;
use queue::TaskQueue;

use crate::clock::{Clock, SystemClock};
use crate::config::NotificationsConfig;
use crate::content::{ContentRenderer, FieldExtension};
use crate::events::EventDescriptor;
use crate::host::{Directory, EditorialComment, Post, User};
use crate::models::Workflow;
use crate::policy::{DispatchPolicy, PolicyChain};
use crate::receivers::ReceiverGroupProvider;

/// Maps channel names to boxed `Channel` implementations.
pub type ChannelRegistry = HashMap<String, Arc<dyn Channel>>;

pub struct AppContext {
    pub pool: DbPool,
    pub directory: Arc<dyn Directory>,
    pub channels: ChannelRegistry,
    pub policies: PolicyChain,
    pub renderer: ContentRenderer,
    pub receiver_groups: Vec<Arc<dyn ReceiverGroupProvider>>,
    pub config: NotificationsConfig,
    pub clock: Arc<dyn Clock>,
    pub queue: TaskQueue,
}

impl AppContext {
    pub fn builder(pool: DbPool, directory: Arc<dyn Directory>, config: NotificationsConfig) -> AppContextBuilder {
        AppContextBuilder {
            pool,
            directory,
            config,
            channels: HashMap::new(),
            policies: Vec::new(),
            extensions: Vec::new(),
            receiver_groups: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn channel(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }
}

pub struct AppContextBuilder {
    pool: DbPool,
    directory: Arc<dyn Directory>,
    config: NotificationsConfig,
    channels: ChannelRegistry,
    policies: Vec<Arc<dyn DispatchPolicy>>,
    extensions: Vec<Arc<dyn FieldExtension>>,
    receiver_groups: Vec<Arc<dyn ReceiverGroupProvider>>,
    clock: Arc<dyn Clock>,
}

impl AppContextBuilder {
    /// Register a channel under its own name.
    pub fn channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.insert(channel.name().to_owned(), channel);
        self
    }

    /// Append a policy after the built-in guard.
    pub fn policy(mut self, policy: Arc<dyn DispatchPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn field_extension(mut self, extension: Arc<dyn FieldExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn receiver_group(mut self, provider: Arc<dyn ReceiverGroupProvider>) -> Self {
        self.receiver_groups.push(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Arc<AppContext> {
        let mut policies = PolicyChain::new();
        for policy in self.policies {
            policies.push(policy);
        }

        let mut renderer = ContentRenderer::new(&self.config.date_format, &self.config.time_format);
        for extension in self.extensions {
            renderer.add_extension(extension);
        }

        Arc::new(AppContext {
            queue: TaskQueue::new(self.pool.clone()),
            pool: self.pool,
            directory: self.directory,
            channels: self.channels,
            policies,
            renderer,
            receiver_groups: self.receiver_groups,
            config: self.config,
            clock: self.clock,
        })
    }
}

/// Everything known about one workflow being considered for one event.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub event: EventDescriptor,
    pub workflow: Workflow,
    /// `None` when the event does not name a resolvable post.
    pub post: Option<Post>,
    pub actor: Option<User>,
    pub comment: Option<EditorialComment>,
}

impl DispatchContext {
    /// Look up the post, actor and comment an event refers to.
    pub async fn load(app: &AppContext, event: &EventDescriptor, workflow: Workflow) -> Self {
        let directory = app.directory.as_ref();
        let post = match event.post_id() {
            Some(id) => directory.post(id).await,
            None => None,
        };
        let actor = directory.user(event.actor_id).await;
        let comment = match event.comment_id() {
            Some(id) => directory.comment(id).await,
            None => None,
        };
        Self { event: event.clone(), workflow, post, actor, comment }
    }

    pub fn post_id(&self) -> i64 {
        self.post
            .as_ref()
            .map(|p| p.id)
            .or_else(|| self.event.post_id())
            .unwrap_or_default()
    }
}
