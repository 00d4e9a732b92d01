//! Event listener layer.
//!
//! Host lifecycle callbacks arrive as [`HostHook`]s.  The [`Listener`]
//! normalises each into an [`EventDescriptor`] (or drops it) and publishes
//! it on the [`EventBus`], whose first subscriber is the workflow
//! controller.  Nothing here returns an error to the host: a failing
//! pipeline must never block the content save that produced the hook.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::context::AppContext;
use crate::controller::{TriggerOptions, TriggerReport, WorkflowController};
use crate::host::Post;
use crate::models::{EventKind, PostId, UserId};
use crate::EngineError;

// ---------------------------------------------------------------------------
// EventDescriptor
// ---------------------------------------------------------------------------

/// A normalised occurrence.
///
/// `args` is a free-form bag mirrored into the log's `event_args` column.
/// Constructors always produce a JSON object; anything else is treated as
/// malformed by the dispatch guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub kind: EventKind,
    pub actor_id: UserId,
    pub args: Value,
    pub occurred_at: DateTime<Utc>,
}

impl EventDescriptor {
    pub fn new(kind: EventKind, actor_id: UserId, args: Value, occurred_at: DateTime<Utc>) -> Self {
        Self { kind, actor_id, args, occurred_at }
    }

    pub fn status_transition(
        post_id: PostId,
        old_status: &str,
        new_status: &str,
        actor_id: UserId,
        site_id: i64,
        at: DateTime<Utc>,
    ) -> Self {
        let args = json!({
            "post_id": post_id,
            "old_status": old_status,
            "new_status": new_status,
            "site_id": site_id,
        });
        Self::new(EventKind::StatusTransition, actor_id, args, at)
    }

    pub fn post_update(post_id: PostId, status: &str, actor_id: UserId, site_id: i64, at: DateTime<Utc>) -> Self {
        let args = json!({
            "post_id": post_id,
            "post_status": status,
            "site_id": site_id,
        });
        Self::new(EventKind::PostUpdate, actor_id, args, at)
    }

    pub fn taxonomy_update(
        post_id: PostId,
        taxonomy: &str,
        terms: &[i64],
        old_terms: &[i64],
        actor_id: UserId,
        site_id: i64,
        at: DateTime<Utc>,
    ) -> Self {
        let args = json!({
            "post_id": post_id,
            "taxonomy": taxonomy,
            "terms": terms,
            "old_terms": old_terms,
            "site_id": site_id,
        });
        Self::new(EventKind::TaxonomyUpdate, actor_id, args, at)
    }

    pub fn editorial_comment(
        post_id: PostId,
        comment_id: i64,
        actor_id: UserId,
        site_id: i64,
        at: DateTime<Utc>,
    ) -> Self {
        let args = json!({
            "post_id": post_id,
            "comment_id": comment_id,
            "site_id": site_id,
        });
        Self::new(EventKind::EditorialComment, actor_id, args, at)
    }

    /// Event name recorded in the log.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Whether the argument bag is a JSON object.
    pub fn has_valid_args(&self) -> bool {
        self.args.is_object()
    }

    fn arg_i64(&self, key: &str) -> Option<i64> {
        self.args.get(key).and_then(Value::as_i64)
    }

    fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    pub fn post_id(&self) -> Option<PostId> {
        self.arg_i64("post_id")
    }

    pub fn old_status(&self) -> Option<&str> {
        self.arg_str("old_status")
    }

    pub fn new_status(&self) -> Option<&str> {
        self.arg_str("new_status")
    }

    pub fn taxonomy(&self) -> Option<&str> {
        self.arg_str("taxonomy")
    }

    pub fn comment_id(&self) -> Option<i64> {
        self.arg_i64("comment_id")
    }

    pub fn site_id(&self) -> Option<i64> {
        self.arg_i64("site_id")
    }
}

// ---------------------------------------------------------------------------
// HostHook
// ---------------------------------------------------------------------------

/// Raw lifecycle callbacks from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "snake_case")]
pub enum HostHook {
    TransitionPostStatus {
        post_id: PostId,
        old_status: String,
        new_status: String,
        actor_id: UserId,
        #[serde(default)]
        autosave: bool,
    },
    PostUpdated {
        post_id: PostId,
        actor_id: UserId,
    },
    SetObjectTerms {
        post_id: PostId,
        taxonomy: String,
        terms: Vec<i64>,
        #[serde(default)]
        old_terms: Vec<i64>,
        actor_id: UserId,
    },
    CommentInserted {
        comment_id: i64,
        actor_id: UserId,
    },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Additional consumer of normalised events.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: &EventDescriptor) -> Result<(), EngineError>;
}

/// Typed pub/sub: the controller always runs first, then subscribers in
/// registration order.  A failing subscriber does not stop the ones after it.
pub struct EventBus {
    controller: Arc<WorkflowController>,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EventBus {
    pub fn new(controller: Arc<WorkflowController>) -> Self {
        Self { controller, subscribers: Vec::new() }
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn controller(&self) -> &Arc<WorkflowController> {
        &self.controller
    }

    pub async fn publish(&self, event: &EventDescriptor) -> TriggerReport {
        let report = match self.controller.trigger(event, &TriggerOptions::default()).await {
            Ok(report) => report,
            Err(e) => {
                error!(event = event.name(), "notification pipeline failed: {e}");
                TriggerReport::default()
            }
        };

        for subscriber in &self.subscribers {
            if let Err(e) = subscriber.on_event(event).await {
                error!(subscriber = subscriber.name(), event = event.name(), "subscriber failed: {e}");
            }
        }

        report
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Result of handing one hook to the listener.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HookOutcome {
    /// `None` when the hook produced no event.
    pub event: Option<EventDescriptor>,
    pub report: TriggerReport,
}

pub struct Listener {
    ctx: Arc<AppContext>,
    bus: EventBus,
}

impl Listener {
    pub fn new(ctx: Arc<AppContext>, bus: EventBus) -> Self {
        Self { ctx, bus }
    }

    /// Listener wired to a fresh controller and no extra subscribers.
    pub fn with_controller(ctx: Arc<AppContext>) -> Self {
        let controller = Arc::new(WorkflowController::new(ctx.clone()));
        Self::new(ctx, EventBus::new(controller))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// Normalise and publish.
    pub async fn handle(&self, hook: HostHook) -> HookOutcome {
        match self.normalize(&hook).await {
            Some(event) => {
                let report = self.bus.publish(&event).await;
                HookOutcome { event: Some(event), report }
            }
            None => HookOutcome::default(),
        }
    }

    /// Turn a hook into an event descriptor, or `None` when it should not
    /// produce one.
    pub async fn normalize(&self, hook: &HostHook) -> Option<EventDescriptor> {
        let site_id = self.ctx.config.site.id;
        let now = self.ctx.clock.now();

        match hook {
            HostHook::TransitionPostStatus { post_id, old_status, new_status, actor_id, autosave } => {
                if *autosave {
                    debug!(post_id, "ignoring autosave");
                    return None;
                }
                if old_status == new_status {
                    return None;
                }
                self.supported_post(*post_id).await?;
                Some(EventDescriptor::status_transition(*post_id, old_status, new_status, *actor_id, site_id, now))
            }

            HostHook::PostUpdated { post_id, actor_id } => {
                let post = self.supported_post(*post_id).await?;
                if post.status == "trash" {
                    return None;
                }
                Some(EventDescriptor::post_update(*post_id, &post.status, *actor_id, site_id, now))
            }

            HostHook::SetObjectTerms { post_id, taxonomy, terms, old_terms, actor_id } => {
                let mut new_sorted = terms.clone();
                let mut old_sorted = old_terms.clone();
                new_sorted.sort_unstable();
                new_sorted.dedup();
                old_sorted.sort_unstable();
                old_sorted.dedup();
                if new_sorted == old_sorted {
                    return None;
                }
                self.supported_post(*post_id).await?;
                Some(EventDescriptor::taxonomy_update(
                    *post_id, taxonomy, &new_sorted, &old_sorted, *actor_id, site_id, now,
                ))
            }

            HostHook::CommentInserted { comment_id, actor_id } => {
                let Some(comment) = self.ctx.directory.comment(*comment_id).await else {
                    warn!(comment_id, "comment not found in directory");
                    return None;
                };
                if !comment.is_editorial() {
                    return None;
                }
                self.supported_post(comment.post_id).await?;
                Some(EventDescriptor::editorial_comment(comment.post_id, comment.id, *actor_id, site_id, now))
            }
        }
    }

    async fn supported_post(&self, post_id: PostId) -> Option<Post> {
        let Some(post) = self.ctx.directory.post(post_id).await else {
            warn!(post_id, "post not found in directory");
            return None;
        };
        if !self.ctx.config.supports_post_type(&post.post_type) {
            debug!(post_id, post_type = %post.post_type, "post type not supported");
            return None;
        }
        Some(post)
    }
}
